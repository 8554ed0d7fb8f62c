//! The umbrella crate end to end: one error type across both actors.

use sigwire::prelude::*;
use sigwire::session::SessionError;
use sigwire::engine::EngineError;

struct Quiet;

impl DispatchTarget for Quiet {}

impl SessionHooks for Quiet {
    fn open(&mut self, _path: &str, _display_name: &str, _client_id: &str) -> Result<(), HookFailure> {
        Ok(())
    }

    fn save(&mut self) -> Result<(), HookFailure> {
        Ok(())
    }

    fn label(&mut self, _text: &str) {}

    fn loaded(&mut self) {}

    fn show(&mut self, _path: &str) {}

    fn hide(&mut self, _path: &str) {}

    fn handle_broadcast(&mut self, _address: &str, _signature: &str, _args: &[Value]) {}
}

async fn add_and_remove_twice(engine: &EngineHandle) -> Result<String, SigwireError> {
    let id = engine
        .add_signal("/gain", Direction::Output, Limits::new(0.0, 1.0, 0.5), None)
        .await?;
    let removed = engine.remove_signal(id).await?;
    engine.remove_signal(id).await?;
    Ok(removed.path)
}

// =========================================================================
// Error conversion through `?`
// =========================================================================

#[tokio::test]
async fn test_engine_failure_converts_to_sigwire_error() {
    let engine = spawn_engine(EngineConfig::named("mixer"), Box::new(NoHooks)).await.unwrap();

    let err = add_and_remove_twice(&engine).await.unwrap_err();
    assert!(matches!(err, SigwireError::Engine(EngineError::SignalNotFound(_))));
    assert_eq!(err.transport_code(), None);

    engine.shutdown().await.unwrap();
    engine.join().await;
}

#[tokio::test]
async fn test_session_without_coordinator_fails_announce() {
    async fn announce() -> Result<usize, SigwireError> {
        let session = spawn_session(SessionConfig::new("Echo", "echo"), Quiet).await?;
        Ok(session.announce().await?)
    }

    let err = announce().await.unwrap_err();
    assert!(matches!(err, SigwireError::Session(SessionError::NoCoordinator)));
}

#[tokio::test]
async fn test_env_coordinator_reaches_session_config() {
    let config = sigwire::env::with_env_coordinator(
        SessionConfig::new("Echo", "echo").with_coordinator("osc.udp://127.0.0.1:15999/"),
    );
    let session = spawn_session(config, Quiet).await.unwrap();
    assert!(session.announce().await.is_ok());
    assert_eq!(session.info().await.unwrap().state, SessionState::Announcing);
    session.shutdown().await.unwrap();
    session.join().await;
}
