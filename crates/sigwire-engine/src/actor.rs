//! Engine actor: one Tokio task that owns an [`EngineCore`] and its
//! receiver.
//!
//! The task is the only writer of peers, signals and translations. It
//! waits on two things at once: commands from [`EngineHandle`]s and
//! datagrams from the socket, bounded by the poll interval so the loop
//! wakes up even when the network is quiet.
//!
//! Host names in peer hellos are resolved on spawned tasks, never on the
//! actor itself. Their results come back through a third channel in the
//! same `select!`.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use sigwire_transport::{OscUrl, Receiver, TransportError};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::{
    Direction, EngineConfig, EngineCore, EngineError, EngineHooks, HostLookup, Limits, Peer, PeerId, SignalId,
    SignalInfo, ValueHandler,
};

type Reply<T> = oneshot::Sender<Result<T, EngineError>>;

/// A closure run against the core on the engine task.
type CoreCall = Box<dyn FnOnce(&mut EngineCore) + Send>;

type LookupResult = (HostLookup, Result<SocketAddr, TransportError>);

/// Commands sent to an engine actor through its channel.
pub(crate) enum EngineCommand {
    Hello {
        dest: SocketAddr,
        reply: Reply<usize>,
    },
    AddSignal {
        path: String,
        direction: Direction,
        limits: Limits,
        handler: Option<ValueHandler>,
        reply: Reply<SignalId>,
    },
    RemoveSignal {
        id: SignalId,
        reply: Reply<SignalInfo>,
    },
    RenameSignal {
        id: SignalId,
        new_path: String,
        reply: Reply<String>,
    },
    ConnectSignal {
        id: SignalId,
        remote: String,
        reply: Reply<bool>,
    },
    DisconnectSignal {
        id: SignalId,
        remote: String,
        reply: Reply<bool>,
    },
    SetValue {
        id: SignalId,
        value: f32,
        reply: Reply<bool>,
    },
    SendFeedback {
        path: String,
        value: f32,
        reply: oneshot::Sender<usize>,
    },
    Learn {
        path: String,
    },
    AddTranslation {
        source: String,
        destination: String,
    },
    RemoveTranslation {
        source: String,
        reply: oneshot::Sender<bool>,
    },
    PeerSignals {
        peer: PeerId,
        reply: Reply<Vec<SignalInfo>>,
    },
    GetInfo {
        reply: oneshot::Sender<EngineInfo>,
    },
    /// Runs an arbitrary closure on the engine task.
    Call(CoreCall),
    Shutdown,
}

/// A snapshot of engine metadata.
#[derive(Debug, Clone)]
pub struct EngineInfo {
    pub name: String,
    pub url: String,
    pub peers: Vec<Peer>,
    pub local_signals: Vec<SignalInfo>,
    pub translations: usize,
    pub learning: Option<String>,
}

/// Handle to a running engine actor.
///
/// Cheap to clone: an `mpsc::Sender` plus the shared join handle.
#[derive(Clone)]
pub struct EngineHandle {
    name: String,
    url: String,
    sender: mpsc::Sender<EngineCommand>,
    task: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl EngineHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The engine's URL, fixed at bind time.
    pub fn url(&self) -> &str {
        &self.url
    }

    async fn request<T>(&self, make: impl FnOnce(oneshot::Sender<T>) -> EngineCommand) -> Result<T, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.sender
            .send(make(reply_tx))
            .await
            .map_err(|_| EngineError::Unavailable)?;
        reply_rx.await.map_err(|_| EngineError::Unavailable)
    }

    async fn post(&self, cmd: EngineCommand) -> Result<(), EngineError> {
        self.sender.send(cmd).await.map_err(|_| EngineError::Unavailable)
    }

    /// Sends our hello to `url`.
    pub async fn hello(&self, url: impl Into<String>) -> Result<usize, EngineError> {
        let url = url.into();
        // Resolved here, on the caller's task, so the engine never waits on DNS.
        let dest = OscUrl::parse(&url)?.resolve().await?;
        self.request(|reply| EngineCommand::Hello { dest, reply }).await?
    }

    pub async fn add_signal(
        &self,
        path: impl Into<String>,
        direction: Direction,
        limits: Limits,
        handler: Option<ValueHandler>,
    ) -> Result<SignalId, EngineError> {
        let path = path.into();
        self.request(|reply| EngineCommand::AddSignal {
            path,
            direction,
            limits,
            handler,
            reply,
        })
        .await?
    }

    pub async fn remove_signal(&self, id: SignalId) -> Result<SignalInfo, EngineError> {
        self.request(|reply| EngineCommand::RemoveSignal { id, reply }).await?
    }

    pub async fn rename_signal(&self, id: SignalId, new_path: impl Into<String>) -> Result<String, EngineError> {
        let new_path = new_path.into();
        self.request(|reply| EngineCommand::RenameSignal { id, new_path, reply })
            .await?
    }

    pub async fn connect_signal(&self, id: SignalId, remote: impl Into<String>) -> Result<bool, EngineError> {
        let remote = remote.into();
        self.request(|reply| EngineCommand::ConnectSignal { id, remote, reply })
            .await?
    }

    pub async fn disconnect_signal(&self, id: SignalId, remote: impl Into<String>) -> Result<bool, EngineError> {
        let remote = remote.into();
        self.request(|reply| EngineCommand::DisconnectSignal { id, remote, reply })
            .await?
    }

    pub async fn set_value(&self, id: SignalId, value: f32) -> Result<bool, EngineError> {
        self.request(|reply| EngineCommand::SetValue { id, value, reply }).await?
    }

    /// Returns the number of feedback messages sent.
    pub async fn send_feedback(&self, path: impl Into<String>, value: f32) -> Result<usize, EngineError> {
        let path = path.into();
        self.request(|reply| EngineCommand::SendFeedback { path, value, reply })
            .await
    }

    /// Arms learning (fire-and-forget).
    pub async fn learn(&self, path: impl Into<String>) -> Result<(), EngineError> {
        self.post(EngineCommand::Learn { path: path.into() }).await
    }

    pub async fn add_translation(
        &self,
        source: impl Into<String>,
        destination: impl Into<String>,
    ) -> Result<(), EngineError> {
        self.post(EngineCommand::AddTranslation {
            source: source.into(),
            destination: destination.into(),
        })
        .await
    }

    pub async fn remove_translation(&self, source: impl Into<String>) -> Result<bool, EngineError> {
        let source = source.into();
        self.request(|reply| EngineCommand::RemoveTranslation { source, reply })
            .await
    }

    pub async fn peer_signals(&self, peer: PeerId) -> Result<Vec<SignalInfo>, EngineError> {
        self.request(|reply| EngineCommand::PeerSignals { peer, reply }).await?
    }

    pub async fn get_info(&self) -> Result<EngineInfo, EngineError> {
        self.request(|reply| EngineCommand::GetInfo { reply }).await
    }

    /// Runs `f` against the core on the engine task and returns its
    /// result. For operations without a dedicated command.
    pub async fn call<T, F>(&self, f: F) -> Result<T, EngineError>
    where
        T: Send + 'static,
        F: FnOnce(&mut EngineCore) -> T + Send + 'static,
    {
        self.request(|reply| {
            EngineCommand::Call(Box::new(move |core| {
                let _ = reply.send(f(core));
            }))
        })
        .await
    }

    /// Asks the actor to stop. The batch in flight is finished first.
    pub async fn shutdown(&self) -> Result<(), EngineError> {
        self.post(EngineCommand::Shutdown).await
    }

    /// Waits for the actor task to end. Only the first caller waits;
    /// later calls return at once.
    pub async fn join(&self) {
        let task = self.task.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                tracing::error!(engine = %self.name, error = %e, "engine task failed");
            }
        }
    }
}

/// The internal actor state. Runs inside a Tokio task.
struct EngineActor {
    core: EngineCore,
    receiver: Receiver,
    commands: mpsc::Receiver<EngineCommand>,
    lookups_tx: mpsc::UnboundedSender<LookupResult>,
    lookups_rx: mpsc::UnboundedReceiver<LookupResult>,
    poll: Duration,
}

impl EngineActor {
    async fn run(mut self) {
        tracing::info!(engine = %self.core.name(), url = %self.core.url(), "engine actor started");

        loop {
            tokio::select! {
                cmd = self.commands.recv() => match cmd {
                    Some(EngineCommand::Shutdown) | None => break,
                    Some(cmd) => self.handle_command(cmd),
                },
                batch = self.receiver.wait(self.poll) => {
                    self.core.dispatch_batch(&batch);
                }
                Some((lookup, result)) = self.lookups_rx.recv() => {
                    self.core.complete_lookup(lookup, result);
                }
            }
            self.spawn_lookups();
        }

        tracing::info!(engine = %self.core.name(), "engine actor stopped");
    }

    /// Resolves each queued hello host on its own task.
    fn spawn_lookups(&mut self) {
        for lookup in self.core.take_lookups() {
            let tx = self.lookups_tx.clone();
            tokio::spawn(async move {
                let result = lookup.url.resolve().await;
                let _ = tx.send((lookup, result));
            });
        }
    }

    fn handle_command(&mut self, cmd: EngineCommand) {
        let core = &mut self.core;
        match cmd {
            EngineCommand::Hello { dest, reply } => {
                let _ = reply.send(core.hello_to(dest));
            }
            EngineCommand::AddSignal {
                path,
                direction,
                limits,
                handler,
                reply,
            } => {
                let _ = reply.send(core.add_signal(&path, direction, limits, handler));
            }
            EngineCommand::RemoveSignal { id, reply } => {
                let _ = reply.send(core.remove_signal(id));
            }
            EngineCommand::RenameSignal { id, new_path, reply } => {
                let _ = reply.send(core.rename_signal(id, &new_path));
            }
            EngineCommand::ConnectSignal { id, remote, reply } => {
                let _ = reply.send(core.connect_signal(id, &remote));
            }
            EngineCommand::DisconnectSignal { id, remote, reply } => {
                let _ = reply.send(core.disconnect_signal(id, &remote));
            }
            EngineCommand::SetValue { id, value, reply } => {
                let _ = reply.send(core.set_value(id, value));
            }
            EngineCommand::SendFeedback { path, value, reply } => {
                let _ = reply.send(core.send_feedback(&path, value));
            }
            EngineCommand::Learn { path } => core.learn(path),
            EngineCommand::AddTranslation { source, destination } => {
                core.add_translation(&source, &destination);
            }
            EngineCommand::RemoveTranslation { source, reply } => {
                let _ = reply.send(core.remove_translation(&source));
            }
            EngineCommand::PeerSignals { peer, reply } => {
                let _ = reply.send(core.peer_signals(peer));
            }
            EngineCommand::GetInfo { reply } => {
                let _ = reply.send(EngineInfo {
                    name: core.name().to_string(),
                    url: core.url(),
                    peers: core.peers().cloned().collect(),
                    local_signals: core.local_signals(),
                    translations: core.translation_count(),
                    learning: core.learning().map(str::to_string),
                });
            }
            EngineCommand::Call(f) => f(core),
            EngineCommand::Shutdown => {}
        }
    }
}

/// Binds an engine and spawns its actor.
///
/// # Errors
/// [`EngineError::Transport`] if the endpoint can't be bound.
pub async fn spawn_engine(config: EngineConfig, hooks: Box<dyn EngineHooks>) -> Result<EngineHandle, EngineError> {
    let config = config.validated();
    let (core, receiver) = EngineCore::bind(&config, hooks).await?;
    Ok(spawn_core(core, receiver, &config))
}

/// Spawns an actor around an already-built core.
pub fn spawn_core(core: EngineCore, receiver: Receiver, config: &EngineConfig) -> EngineHandle {
    let (tx, rx) = mpsc::channel(config.channel_size.max(1));
    let (lookups_tx, lookups_rx) = mpsc::unbounded_channel();
    let name = core.name().to_string();
    let url = core.url();

    let actor = EngineActor {
        core,
        receiver,
        commands: rx,
        lookups_tx,
        lookups_rx,
        poll: config.poll_interval(),
    };
    let task = tokio::spawn(actor.run());

    EngineHandle {
        name,
        url,
        sender: tx,
        task: Arc::new(Mutex::new(Some(task))),
    }
}
