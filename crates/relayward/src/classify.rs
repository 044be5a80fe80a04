use relayward_core::ControllerState;

/// Substrings that mark a backend as started or failed in its output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeywordSet {
	pub started: &'static [&'static str],
	pub stopped: &'static [&'static str],
}

impl KeywordSet {
	pub const fn new(started: &'static [&'static str], stopped: &'static [&'static str]) -> Self {
		Self { started, stopped }
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
	None,
	Started,
	Stopped,
}

impl Transition {
	pub fn target(self) -> Option<ControllerState> {
		match self {
			Transition::None => None,
			Transition::Started => Some(ControllerState::Started),
			Transition::Stopped => Some(ControllerState::Stopped),
		}
	}
}

/// Classifies one output line received while a backend is starting.
///
/// Outside `Starting` nothing is reclassified. An exited process is always
/// `Stopped`, whatever the line says; otherwise a started keyword wins over a
/// stopped keyword on the same line.
pub fn classify(
	state: ControllerState,
	exited: bool,
	line: &str,
	keywords: &KeywordSet,
) -> Transition {
	if state != ControllerState::Starting {
		return Transition::None;
	}
	if exited {
		return Transition::Stopped;
	}
	if keywords.started.iter().any(|k| line.contains(k)) {
		return Transition::Started;
	}
	if keywords.stopped.iter().any(|k| line.contains(k)) {
		return Transition::Stopped;
	}
	Transition::None
}
