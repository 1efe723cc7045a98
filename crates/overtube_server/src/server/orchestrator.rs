#![forbid(unsafe_code)]

use std::ops::ControlFlow;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

use overtube_domain::{ChannelId, ConnectionStatus, ParseIdError, Platform};
use overtube_platform::ConnectorFactory;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::server::app_state::AppState;
use crate::server::broadcast::BroadcastServer;

/// User intents consumed by the orchestrator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OrchestratorCommand {
	SetChannel { platform: Platform, channel: ChannelId },
	RemoveChannel { platform: Platform },
	/// Select the overlay chat style.
	SetChatStyle { id: u32 },
	/// Replace the CSS of one chat style.
	SetCustomCss { id: u32, css: String },
	/// Drop a style's custom CSS so its stock look applies again.
	ResetCustomCss { id: u32 },
	RefreshClients,
	Exit,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CommandParseError {
	#[error("empty command")]
	Empty,

	#[error("unknown command {0:?}")]
	Unknown(String),

	#[error("usage: {0}")]
	Usage(&'static str),

	#[error("invalid style id {0:?}")]
	StyleId(String),

	#[error(transparent)]
	Id(#[from] ParseIdError),
}

/// First whitespace-delimited word and the untouched remainder.
fn next_word(s: &str) -> Option<(&str, &str)> {
	let s = s.trim_start();
	if s.is_empty() {
		return None;
	}
	let end = s.find(char::is_whitespace).unwrap_or(s.len());
	Some((&s[..end], &s[end..]))
}

fn style_id(word: &str) -> Result<u32, CommandParseError> {
	word.parse().map_err(|_| CommandParseError::StyleId(word.to_string()))
}

impl FromStr for OrchestratorCommand {
	type Err = CommandParseError;

	/// `set <platform> <id>`, `remove <platform>`, `style <id>`, `css set <id> <css>`,
	/// `css reset <id>`, `refresh`, `exit`.
	fn from_str(line: &str) -> Result<Self, Self::Err> {
		let Some((verb, rest)) = next_word(line) else {
			return Err(CommandParseError::Empty);
		};

		let (cmd, rest) = match verb.to_ascii_lowercase().as_str() {
			"set" => {
				const USAGE: &str = "set <youtube|twitch> <channel>";
				let (platform, rest) = next_word(rest).ok_or(CommandParseError::Usage(USAGE))?;
				let (id, rest) = next_word(rest).ok_or(CommandParseError::Usage(USAGE))?;
				let cmd = OrchestratorCommand::SetChannel {
					platform: platform.parse()?,
					channel: ChannelId::new(id)?,
				};
				(cmd, rest)
			}
			"remove" => {
				let (platform, rest) = next_word(rest).ok_or(CommandParseError::Usage("remove <youtube|twitch>"))?;
				let cmd = OrchestratorCommand::RemoveChannel {
					platform: platform.parse()?,
				};
				(cmd, rest)
			}
			"style" => {
				let (id, rest) = next_word(rest).ok_or(CommandParseError::Usage("style <id>"))?;
				(OrchestratorCommand::SetChatStyle { id: style_id(id)? }, rest)
			}
			"css" => {
				const USAGE: &str = "css set <id> <css> | css reset <id>";
				let (action, rest) = next_word(rest).ok_or(CommandParseError::Usage(USAGE))?;
				let (id, rest) = next_word(rest).ok_or(CommandParseError::Usage(USAGE))?;
				let id = style_id(id)?;
				match action.to_ascii_lowercase().as_str() {
					"set" => {
						let css = rest.trim();
						if css.is_empty() {
							return Err(CommandParseError::Usage(USAGE));
						}
						(
							OrchestratorCommand::SetCustomCss {
								id,
								css: css.to_string(),
							},
							"",
						)
					}
					"reset" => (OrchestratorCommand::ResetCustomCss { id }, rest),
					_ => return Err(CommandParseError::Usage(USAGE)),
				}
			}
			"refresh" => (OrchestratorCommand::RefreshClients, rest),
			"exit" | "quit" => (OrchestratorCommand::Exit, rest),
			other => return Err(CommandParseError::Unknown(other.to_string())),
		};

		if next_word(rest).is_some() {
			return Err(CommandParseError::Usage("too many arguments"));
		}
		Ok(cmd)
	}
}

/// Owns the broadcast server and turns intents into connector lifecycles.
pub struct Orchestrator {
	server: BroadcastServer,
	factory: Arc<dyn ConnectorFactory>,
	app_state: AppState,
	state_path: PathBuf,
}

impl Orchestrator {
	pub fn new(server: BroadcastServer, factory: Arc<dyn ConnectorFactory>, app_state: AppState, state_path: PathBuf) -> Self {
		Self {
			server,
			factory,
			app_state,
			state_path,
		}
	}

	#[cfg(test)]
	pub fn server(&self) -> &BroadcastServer {
		&self.server
	}

	#[cfg(test)]
	pub fn app_state(&self) -> &AppState {
		&self.app_state
	}

	/// `SetChannel` for every channel remembered in the app state.
	pub fn restore_commands(&self) -> Vec<OrchestratorCommand> {
		Platform::ALL
			.into_iter()
			.filter_map(|platform| {
				let saved = self.app_state.channel(platform)?;
				match ChannelId::new(saved) {
					Ok(channel) => Some(OrchestratorCommand::SetChannel { platform, channel }),
					Err(e) => {
						warn!(%platform, saved, error = %e, "ignoring invalid saved channel");
						None
					}
				}
			})
			.collect()
	}

	pub async fn handle(&mut self, cmd: OrchestratorCommand) -> ControlFlow<()> {
		debug!(?cmd, "orchestrator command");
		match cmd {
			OrchestratorCommand::SetChannel { platform, channel } => self.set_channel(platform, channel).await,
			OrchestratorCommand::RemoveChannel { platform } => {
				self.server.remove_all_streams_from_platform(platform);
				self.app_state.clear_channel(platform);
				self.persist();
			}
			OrchestratorCommand::SetChatStyle { id } => {
				self.app_state.chat_style_id = id;
				self.persist();
				info!(id, custom_css = self.app_state.custom_css(id).is_some(), "chat style selected");
				self.server.refresh_clients().await;
			}
			OrchestratorCommand::SetCustomCss { id, css } => {
				self.app_state.set_custom_css(id, css);
				self.persist();
				info!(id, "custom css saved");
				self.refresh_if_selected(id).await;
			}
			OrchestratorCommand::ResetCustomCss { id } => {
				self.app_state.reset_custom_css(id);
				self.persist();
				info!(id, "custom css reset");
				self.refresh_if_selected(id).await;
			}
			OrchestratorCommand::RefreshClients => {
				info!(clients = self.server.client_count(), "refreshing overlays");
				self.server.refresh_clients().await;
			}
			OrchestratorCommand::Exit => return ControlFlow::Break(()),
		}
		ControlFlow::Continue(())
	}

	async fn set_channel(&mut self, platform: Platform, channel: ChannelId) {
		self.server.remove_all_streams_from_platform(platform);
		self.server.emit_status(platform, ConnectionStatus::Starting);

		match self.factory.connect(platform, channel.clone()).await {
			Ok(connector) => {
				info!(%platform, %channel, "chat stream connected");
				self.server.add_stream(connector).await;
				self.app_state.set_channel(platform, channel.as_str());
				self.persist();
				debug!(active = ?self.server.active_platforms(), "active chat streams");
			}
			Err(e) => {
				warn!(%platform, %channel, error = %e, "failed to connect chat stream");
				metrics::counter!("overtube_connect_failures_total", "platform" => platform.as_str()).increment(1);
				self.server.emit_status(platform, ConnectionStatus::Stopped);
			}
		}
	}

	/// Overlays only need a reload when the edited style is the one on screen.
	async fn refresh_if_selected(&self, id: u32) {
		if self.app_state.chat_style_id == id {
			self.server.refresh_clients().await;
		}
	}

	fn persist(&self) {
		if let Err(e) = self.app_state.save(&self.state_path) {
			warn!(path = %self.state_path.display(), error = %format!("{e:#}"), "failed to save app state");
		}
	}

	/// Consume commands until `Exit` or the sender goes away, then stop the server.
	pub async fn run(mut self, mut commands: mpsc::Receiver<OrchestratorCommand>) -> AppState {
		while let Some(cmd) = commands.recv().await {
			if self.handle(cmd).await.is_break() {
				break;
			}
		}

		info!("orchestrator exiting");
		self.server.stop().await;
		self.app_state
	}
}
