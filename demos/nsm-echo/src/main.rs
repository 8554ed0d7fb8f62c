use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use sigwire::prelude::*;

// ---------------------------------------------------------------------------
// Saved state
// ---------------------------------------------------------------------------

/// Everything the demo keeps between sessions.
#[derive(Debug, Default, Serialize, Deserialize)]
struct Saved {
    label: String,
    saves: u32,
}

// ---------------------------------------------------------------------------
// Hooks
// ---------------------------------------------------------------------------

/// Logs every coordinator command and keeps a small JSON file per session.
#[derive(Default)]
struct Echo {
    file: Option<PathBuf>,
    saved: Saved,
}

impl Echo {
    fn write(&self) -> Result<(), HookFailure> {
        let Some(file) = &self.file else {
            return Err(HookFailure::new(ErrorCode::NoSessionOpen, "nothing opened yet"));
        };
        let text = serde_json::to_string_pretty(&self.saved)
            .map_err(|e| HookFailure::new(ErrorCode::SaveFailed, e.to_string()))?;
        std::fs::write(file, text).map_err(|e| HookFailure::new(ErrorCode::SaveFailed, e.to_string()))
    }
}

impl DispatchTarget for Echo {}

impl SessionHooks for Echo {
    fn announced(&mut self, info: &SessionInfo) {
        tracing::info!(manager = %info.manager, caps = %info.coordinator_capabilities, "announced");
    }

    fn open(&mut self, path: &str, display_name: &str, client_id: &str) -> Result<(), HookFailure> {
        tracing::info!(path, display_name, client_id, "open");
        let file = PathBuf::from(format!("{path}.json"));
        self.saved = match std::fs::read_to_string(&file) {
            Ok(text) => serde_json::from_str(&text)
                .map_err(|e| HookFailure::new(ErrorCode::BadProject, e.to_string()))?,
            Err(_) => Saved::default(),
        };
        self.file = Some(file);
        Ok(())
    }

    fn save(&mut self) -> Result<(), HookFailure> {
        self.saved.saves += 1;
        tracing::info!(saves = self.saved.saves, "save");
        self.write()
    }

    fn label(&mut self, text: &str) {
        tracing::info!(text, "label");
        self.saved.label = text.to_string();
    }

    fn loaded(&mut self) {
        tracing::info!("session loaded");
    }

    fn show(&mut self, path: &str) {
        tracing::info!(path, "show gui");
    }

    fn hide(&mut self, path: &str) {
        tracing::info!(path, "hide gui");
    }

    fn handle_broadcast(&mut self, address: &str, signature: &str, args: &[Value]) {
        tracing::info!(address, signature, args = args.len(), "broadcast");
    }
}

#[tokio::main]
async fn main() -> Result<(), SigwireError> {
    sigwire::logging::init();

    let config = sigwire::env::with_env_coordinator(
        SessionConfig::new("Echo", "nsm-echo").with_capabilities(":dirty:message:"),
    );
    if config.coordinator_url.is_none() {
        tracing::warn!("{} is not set; running without a session", sigwire::env::COORDINATOR_URL_VAR);
    }

    let session = spawn_session(config, Echo::default()).await?;
    tracing::info!(url = %session.url(), "listening");
    if session.announce().await.is_ok() {
        tracing::info!("announce sent");
    }

    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "cannot listen for ctrl-c");
    }
    session.shutdown().await?;
    session.join().await;
    Ok(())
}
