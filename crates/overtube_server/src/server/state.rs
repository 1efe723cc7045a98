#![forbid(unsafe_code)]

use std::collections::HashMap;
use std::sync::Arc;

use overtube_domain::Platform;
use overtube_platform::Connector;
use parking_lot::Mutex;
use thiserror::Error;

use crate::server::client::ClientHandle;

/// Why an overlay upgrade was turned away.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum AdmissionRejected {
	#[error("no active chat streams")]
	NoActiveStreams,

	#[error("client limit reached ({max})")]
	AtCapacity { max: usize },

	#[error("server stopped")]
	Stopped,
}

impl AdmissionRejected {
	pub fn as_str(self) -> &'static str {
		match self {
			AdmissionRejected::NoActiveStreams => "no_streams",
			AdmissionRejected::AtCapacity { .. } => "at_capacity",
			AdmissionRejected::Stopped => "stopped",
		}
	}
}

/// Active connectors and live overlay clients.
///
/// Reserved slots count toward the client cap so concurrent upgrades cannot overshoot it.
pub struct ServerState {
	connectors: Vec<Arc<dyn Connector>>,
	clients: HashMap<u64, Arc<ClientHandle>>,
	reserved: usize,
	max_clients: usize,
	stopped: bool,
}

impl ServerState {
	pub fn new(max_clients: usize) -> Self {
		Self {
			connectors: Vec::new(),
			clients: HashMap::new(),
			reserved: 0,
			max_clients,
			stopped: false,
		}
	}

	fn try_reserve(&mut self) -> Result<(), AdmissionRejected> {
		if self.stopped {
			return Err(AdmissionRejected::Stopped);
		}
		if self.connectors.is_empty() {
			return Err(AdmissionRejected::NoActiveStreams);
		}
		if self.clients.len() + self.reserved >= self.max_clients {
			return Err(AdmissionRejected::AtCapacity { max: self.max_clients });
		}
		self.reserved += 1;
		Ok(())
	}

	fn release(&mut self) {
		self.reserved = self.reserved.saturating_sub(1);
	}

	pub fn client_count(&self) -> usize {
		self.clients.len()
	}

	pub fn clients(&self) -> Vec<Arc<ClientHandle>> {
		self.clients.values().cloned().collect()
	}

	pub fn remove_client(&mut self, id: u64) -> Option<Arc<ClientHandle>> {
		self.clients.remove(&id)
	}

	pub fn drain_clients(&mut self) -> Vec<Arc<ClientHandle>> {
		self.clients.drain().map(|(_, c)| c).collect()
	}

	pub fn add_connector(&mut self, connector: Arc<dyn Connector>) {
		self.connectors.push(connector);
	}

	pub fn connectors(&self) -> Vec<Arc<dyn Connector>> {
		self.connectors.clone()
	}

	pub fn connector_count(&self) -> usize {
		self.connectors.len()
	}

	pub fn remove_connector(&mut self, connector: &Arc<dyn Connector>) -> bool {
		let before = self.connectors.len();
		self.connectors.retain(|c| !Arc::ptr_eq(c, connector));
		self.connectors.len() != before
	}

	/// Detach every connector for `platform`.
	pub fn take_platform(&mut self, platform: Platform) -> Vec<Arc<dyn Connector>> {
		let (taken, kept): (Vec<_>, Vec<_>) = std::mem::take(&mut self.connectors)
			.into_iter()
			.partition(|c| c.platform() == platform);
		self.connectors = kept;
		taken
	}

	/// Mark stopped and hand back everything still attached.
	pub fn shut_down(&mut self) -> (Vec<Arc<dyn Connector>>, Vec<Arc<ClientHandle>>) {
		self.stopped = true;
		(std::mem::take(&mut self.connectors), self.drain_clients())
	}
}

/// A client slot held between the upgrade request and registration. Dropping it frees the slot.
pub struct Reservation {
	state: Arc<Mutex<ServerState>>,
	held: bool,
}

impl Reservation {
	pub fn acquire(state: &Arc<Mutex<ServerState>>) -> Result<Self, AdmissionRejected> {
		state.lock().try_reserve()?;
		Ok(Self {
			state: state.clone(),
			held: true,
		})
	}

	/// Turn the slot into a live client. Fails if the server stopped meanwhile.
	pub fn admit(mut self, client: Arc<ClientHandle>) -> Result<(), AdmissionRejected> {
		let mut st = self.state.lock();
		st.release();
		self.held = false;
		if st.stopped {
			return Err(AdmissionRejected::Stopped);
		}
		st.clients.insert(client.id(), client);
		Ok(())
	}
}

impl Drop for Reservation {
	fn drop(&mut self) {
		if self.held {
			self.state.lock().release();
		}
	}
}

#[cfg(test)]
mod tests {
	use overtube_domain::ChannelId;
	use overtube_platform::ConnectorCore;

	use super::*;

	fn shared(max: usize) -> Arc<Mutex<ServerState>> {
		Arc::new(Mutex::new(ServerState::new(max)))
	}

	fn connector(platform: Platform) -> Arc<dyn Connector> {
		ConnectorCore::new(platform, ChannelId::new("somechannel").unwrap())
	}

	#[test]
	fn refuses_without_streams() {
		let state = shared(5);
		assert_eq!(Reservation::acquire(&state).err(), Some(AdmissionRejected::NoActiveStreams));
	}

	#[test]
	fn cap_counts_reserved_slots() {
		let state = shared(5);
		state.lock().add_connector(connector(Platform::Twitch));

		let held: Vec<_> = (0..5).map(|_| Reservation::acquire(&state).unwrap()).collect();
		assert_eq!(
			Reservation::acquire(&state).err(),
			Some(AdmissionRejected::AtCapacity { max: 5 })
		);

		drop(held);
		assert!(Reservation::acquire(&state).is_ok());
	}

	#[test]
	fn refusal_does_not_consume_a_slot() {
		let state = shared(1);
		assert!(Reservation::acquire(&state).is_err());
		state.lock().add_connector(connector(Platform::YouTube));
		assert!(Reservation::acquire(&state).is_ok());
	}

	#[test]
	fn take_platform_keeps_others() {
		let state = shared(5);
		let yt = connector(Platform::YouTube);
		{
			let mut st = state.lock();
			st.add_connector(connector(Platform::Twitch));
			st.add_connector(yt.clone());
			st.add_connector(connector(Platform::Twitch));
		}

		let taken = state.lock().take_platform(Platform::Twitch);
		assert_eq!(taken.len(), 2);

		let left = state.lock().connectors();
		assert_eq!(left.len(), 1);
		assert!(Arc::ptr_eq(&left[0], &yt));
		assert!(state.lock().remove_connector(&yt));
		assert!(!state.lock().remove_connector(&yt));
	}

	#[test]
	fn stopped_state_refuses_everyone() {
		let state = shared(5);
		state.lock().add_connector(connector(Platform::Twitch));
		let (connectors, clients) = state.lock().shut_down();
		assert_eq!(connectors.len(), 1);
		assert!(clients.is_empty());
		assert_eq!(Reservation::acquire(&state).err(), Some(AdmissionRejected::Stopped));
	}
}
