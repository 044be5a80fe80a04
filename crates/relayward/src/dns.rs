use std::collections::HashMap;
use std::net::IpAddr;
use std::time::Duration;
use tokio::sync::RwLock;

const LOOKUP_TIMEOUT: Duration = Duration::from_secs(5);

/// Hostname resolution with a process-lifetime cache.
#[derive(Default)]
pub struct Resolver {
	cache: RwLock<HashMap<String, IpAddr>>,
}

impl Resolver {
	pub fn new() -> Self {
		Self::default()
	}

	/// Resolves `host`, preferring IPv4. IP literals are returned as-is.
	pub async fn lookup(&self, host: &str) -> Option<IpAddr> {
		if let Ok(ip) = host.parse::<IpAddr>() {
			return Some(ip);
		}

		if let Some(ip) = self.cache.read().await.get(host) {
			return Some(*ip);
		}

		let addrs: Vec<IpAddr> =
			match tokio::time::timeout(LOOKUP_TIMEOUT, tokio::net::lookup_host((host, 0))).await {
				Ok(Ok(addrs)) => addrs.map(|a| a.ip()).collect(),
				Ok(Err(e)) => {
					tracing::debug!(host, "lookup failed: {}", e);
					return None;
				}
				Err(_) => {
					tracing::debug!(host, "lookup timed out");
					return None;
				}
			};

		let ip = addrs
			.iter()
			.find(|ip| ip.is_ipv4())
			.or_else(|| addrs.first())
			.copied()?;

		self.cache.write().await.insert(host.to_string(), ip);
		Some(ip)
	}

	pub async fn insert(&self, host: impl Into<String>, ip: IpAddr) {
		self.cache.write().await.insert(host.into(), ip);
	}

	pub async fn clear_cache(&self) {
		self.cache.write().await.clear();
	}

	pub async fn cached(&self) -> usize {
		self.cache.read().await.len()
	}
}
