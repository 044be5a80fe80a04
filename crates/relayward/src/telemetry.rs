use relayward_core::BandwidthSample;

pub const BANDWIDTH_PREFIX: &str = "[APP][Bandwidth]";

pub fn is_telemetry(line: &str) -> bool {
	line.starts_with(BANDWIDTH_PREFIX)
}

/// Parses `[APP][Bandwidth]upload:<u64>,download:<u64>`.
///
/// Malformed lines yield `None`; the redirector can flush partial writes and
/// those must never reach supervision state.
pub fn parse(line: &str) -> Option<BandwidthSample> {
	let body = line.strip_prefix(BANDWIDTH_PREFIX)?.trim();
	let fields: Vec<&str> = body.split(',').collect();
	if fields.len() != 2 {
		return None;
	}
	let upload = counter(fields[0])?;
	let download = counter(fields[1])?;
	Some(BandwidthSample { upload, download })
}

fn counter(field: &str) -> Option<u64> {
	let parts: Vec<&str> = field.split(':').collect();
	if parts.len() != 2 {
		return None;
	}
	parts[1].trim().parse().ok()
}

pub fn format(sample: &BandwidthSample) -> String {
	format!(
		"{}upload:{},download:{}",
		BANDWIDTH_PREFIX, sample.upload, sample.download
	)
}
