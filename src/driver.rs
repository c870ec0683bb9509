//! Задача, которая владеет [`Session`].
//!
//! Входящая сигнализация, события peer link и команды UI сходятся в один цикл,
//! поэтому сессию никогда не трогают из двух мест сразу. Пока обработчик ждёт
//! peer link, цикл продолжает читать каналы: выход, обрыв или `full` бросают
//! незавершённую операцию, остальное копится в очереди.

use crate::peer::PeerLinkEvent;
use crate::session::{MembershipState, Session, SessionDeps, SessionEvent};
use crate::signaling::protocol::{InboundEvent, MembershipEvent};
use crate::signaling::InboundReceiver;
use std::collections::VecDeque;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Запросы от UI
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Join,
    Leave,
    RetryAnswer,
    RetryOffer,
}

impl Command {
    pub fn name(self) -> &'static str {
        match self {
            Self::Join => "join",
            Self::Leave => "leave",
            Self::RetryAnswer => "retry_answer",
            Self::RetryOffer => "retry_offer",
        }
    }
}

/// Сторона вызывающего у запущенной сессии
pub struct SessionHandle {
    commands: mpsc::UnboundedSender<Command>,
    pub events: mpsc::UnboundedReceiver<SessionEvent>,
}

impl SessionHandle {
    /// `false`, если драйвер уже остановлен
    pub fn send(&self, cmd: Command) -> bool {
        self.commands.send(cmd).is_ok()
    }

    pub fn join(&self) -> bool {
        self.send(Command::Join)
    }

    pub fn leave(&self) -> bool {
        self.send(Command::Leave)
    }
}

#[derive(Debug)]
enum Input {
    Inbound(InboundEvent),
    Peer(PeerLinkEvent),
    Command(Command),
}

impl Input {
    fn inbound(event: Option<InboundEvent>) -> Self {
        // канал закрылся без события: считаем это разрывом
        Self::Inbound(event.unwrap_or(InboundEvent::Membership(MembershipEvent::Disconnected)))
    }

    fn command(cmd: Option<Command>) -> Self {
        Self::Command(cmd.unwrap_or_else(|| {
            debug!("command channel closed, leaving");
            Command::Leave
        }))
    }

    /// После таких входов текущая операция с peer link теряет смысл
    fn interrupts(&self, room_id: &str) -> bool {
        match self {
            Self::Command(Command::Leave) => true,
            Self::Inbound(InboundEvent::Membership(event)) => match event {
                MembershipEvent::Disconnected => true,
                MembershipEvent::Full { room_id: room, .. }
                | MembershipEvent::Left { room_id: room, .. } => room == room_id,
                _ => false,
            },
            _ => false,
        }
    }
}

pub struct Driver {
    room_id: String,
    session: Session,
    inbound: InboundReceiver,
    peer_events: mpsc::UnboundedReceiver<PeerLinkEvent>,
    commands: mpsc::UnboundedReceiver<Command>,
    /// Входы, пришедшие во время незавершённой операции
    backlog: VecDeque<Input>,
}

impl Driver {
    pub fn new(
        session: Session,
        inbound: InboundReceiver,
        peer_events: mpsc::UnboundedReceiver<PeerLinkEvent>,
        commands: mpsc::UnboundedReceiver<Command>,
    ) -> Self {
        Self {
            room_id: session.room_id().to_owned(),
            session,
            inbound,
            peer_events,
            commands,
            backlog: VecDeque::new(),
        }
    }

    /// Работает, пока сессия не дойдёт до `left`, и возвращает её
    pub async fn run(mut self) -> Session {
        info!(room = %self.room_id, "session driver started");

        while self.session.state() != MembershipState::Left {
            let input = match self.backlog.pop_front() {
                Some(input) => input,
                None => self.next_input().await,
            };
            self.dispatch(input).await;
        }

        if !self.backlog.is_empty() {
            debug!(dropped = self.backlog.len(), "inputs left after leaving");
        }
        info!(room = %self.room_id, "session driver stopped");
        self.session
    }

    async fn next_input(&mut self) -> Input {
        tokio::select! {
            event = self.inbound.recv() => Input::inbound(event),
            Some(event) = self.peer_events.recv() => Input::Peer(event),
            cmd = self.commands.recv() => Input::command(cmd),
        }
    }

    async fn dispatch(&mut self, input: Input) {
        if input.interrupts(&self.room_id) {
            apply(&mut self.session, input).await;
            return;
        }

        let Self {
            room_id,
            session,
            inbound,
            commands,
            backlog,
            ..
        } = self;
        let room_id = room_id.as_str();

        let interrupt = {
            let work = apply(session, input);
            tokio::pin!(work);
            loop {
                tokio::select! {
                    biased;
                    () = &mut work => break None,
                    event = inbound.recv() => {
                        let input = Input::inbound(event);
                        if input.interrupts(room_id) {
                            break Some(input);
                        }
                        backlog.push_back(input);
                    }
                    cmd = commands.recv() => {
                        let input = Input::command(cmd);
                        if input.interrupts(room_id) {
                            break Some(input);
                        }
                        backlog.push_back(input);
                    }
                }
            }
        };

        // незавершённая операция уже сброшена вместе с `work`
        if let Some(input) = interrupt {
            warn!(?input, "in-flight operation abandoned");
            apply(session, input).await;
        }
    }
}

async fn apply(session: &mut Session, input: Input) {
    match input {
        Input::Inbound(event) => {
            if let Err(e) = session.handle_inbound(event).await {
                warn!(error = %e, "inbound event not applied");
            }
        }
        Input::Peer(event) => session.handle_peer_event(event).await,
        Input::Command(cmd) => {
            let result = match cmd {
                Command::Join => session.request_join().await,
                Command::Leave => session.request_leave().await,
                Command::RetryAnswer => session.retry_answer().await,
                Command::RetryOffer => session.retry_offer().await,
            };
            if let Err(e) = result {
                warn!(?cmd, error = %e, "command rejected");
                session.notify_rejected(cmd.name(), &e);
            }
        }
    }
}

/// Собирает каналы вокруг новой сессии. Запуск: `tokio::spawn(driver.run())`
pub fn start(
    room_id: impl Into<String>,
    deps: SessionDeps,
    inbound: InboundReceiver,
) -> (Driver, SessionHandle) {
    let (peer_tx, peer_rx) = mpsc::unbounded_channel();
    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();

    let session = Session::new(room_id, deps, peer_tx, events_tx);
    let driver = Driver::new(session, inbound, peer_rx, cmd_rx);
    let handle = SessionHandle {
        commands: cmd_tx,
        events: events_rx,
    };
    (driver, handle)
}
