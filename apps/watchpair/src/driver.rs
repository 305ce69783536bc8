//! Runs one `Participant` on its own task and feeds it commands.

use anyhow::{Context, Result, anyhow};
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use watchpair_core::{ControlAction, Participant, PlaybackSnapshot, SessionError, StatusEvent};

const COMMAND_CAPACITY: usize = 32;

enum Command {
    CreateRoom(String, oneshot::Sender<Result<(), SessionError>>),
    JoinRoom(String, oneshot::Sender<Result<(), SessionError>>),
    Load(String),
    Act(ControlAction, Option<f64>),
    SeekForward,
    SeekBack,
    SyncNow,
    Hangup,
    Snapshot(oneshot::Sender<PlaybackSnapshot>),
}

pub struct ParticipantHandle {
    name: &'static str,
    commands: mpsc::Sender<Command>,
    task: JoinHandle<()>,
    logger: JoinHandle<()>,
}

pub fn spawn(name: &'static str, participant: Participant) -> ParticipantHandle {
    let (commands, rx) = mpsc::channel(COMMAND_CAPACITY);
    let logger = tokio::spawn(log_events(name, participant.subscribe()));
    let task = tokio::spawn(run(name, participant, rx));
    ParticipantHandle {
        name,
        commands,
        task,
        logger,
    }
}

impl ParticipantHandle {
    pub async fn create_room(&self, room: &str) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.send(Command::CreateRoom(room.to_string(), tx)).await?;
        rx.await
            .context("participant task stopped")?
            .with_context(|| format!("{} could not create room {room}", self.name))
    }

    pub async fn join_room(&self, room: &str) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.send(Command::JoinRoom(room.to_string(), tx)).await?;
        rx.await
            .context("participant task stopped")?
            .with_context(|| format!("{} could not join room {room}", self.name))
    }

    pub async fn load(&self, source: &str) -> Result<()> {
        self.send(Command::Load(source.to_string())).await
    }

    pub async fn play(&self) -> Result<()> {
        self.send(Command::Act(ControlAction::Play, None)).await
    }

    pub async fn pause(&self) -> Result<()> {
        self.send(Command::Act(ControlAction::Pause, None)).await
    }

    pub async fn seek_forward(&self) -> Result<()> {
        self.send(Command::SeekForward).await
    }

    pub async fn seek_back(&self) -> Result<()> {
        self.send(Command::SeekBack).await
    }

    pub async fn sync_now(&self) -> Result<()> {
        self.send(Command::SyncNow).await
    }

    pub async fn hangup(&self) -> Result<()> {
        self.send(Command::Hangup).await
    }

    pub async fn snapshot(&self) -> Result<PlaybackSnapshot> {
        let (tx, rx) = oneshot::channel();
        self.send(Command::Snapshot(tx)).await?;
        rx.await.context("participant task stopped")
    }

    /// Stops the task once queued commands are done.
    pub async fn shutdown(self) {
        drop(self.commands);
        if let Err(err) = self.task.await {
            warn!(participant = self.name, error = %err, "participant task failed");
        }
        self.logger.abort();
    }

    async fn send(&self, command: Command) -> Result<()> {
        self.commands
            .send(command)
            .await
            .map_err(|_| anyhow!("{} is no longer running", self.name))
    }
}

async fn run(name: &'static str, mut participant: Participant, mut commands: mpsc::Receiver<Command>) {
    loop {
        tokio::select! {
            command = commands.recv() => match command {
                Some(command) => apply(name, &mut participant, command).await,
                None => break,
            },
            Some(input) = participant.next_input() => participant.handle_input(input).await,
        }
    }
    participant.hangup().await;
    debug!(participant = name, "participant task finished");
}

async fn apply(name: &'static str, participant: &mut Participant, command: Command) {
    // Playback failures are already reported as MediaError status events.
    let outcome = match command {
        Command::CreateRoom(room, reply) => {
            let _ = reply.send(participant.create_room(&room).await);
            Ok(())
        }
        Command::JoinRoom(room, reply) => {
            let _ = reply.send(participant.join_room(&room).await);
            Ok(())
        }
        Command::Load(source) => participant.load(&source).await,
        Command::Act(action, delta) => participant.act(action, delta).await,
        Command::SeekForward => participant.seek_forward().await,
        Command::SeekBack => participant.seek_back().await,
        Command::SyncNow => participant.sync_now().await,
        Command::Hangup => {
            participant.hangup().await;
            Ok(())
        }
        Command::Snapshot(reply) => {
            let _ = reply.send(participant.snapshot());
            Ok(())
        }
    };
    if let Err(err) = outcome {
        debug!(participant = name, error = %err, "command rejected");
    }
}

async fn log_events(name: &'static str, mut events: broadcast::Receiver<StatusEvent>) {
    loop {
        match events.recv().await {
            Ok(StatusEvent::Notice(text)) => info!(participant = name, "{text}"),
            Ok(StatusEvent::MediaError { reason }) => warn!(participant = name, %reason, "media error"),
            Ok(StatusEvent::Playback(snapshot)) => debug!(
                participant = name,
                mode = ?snapshot.mode,
                position = snapshot.position,
                paused = snapshot.paused,
                "playback"
            ),
            Ok(event) => debug!(participant = name, ?event, "status"),
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(participant = name, skipped, "status log lagged")
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}
