use crate::config::KeepAlive;
use crate::error::SignalingError;
use crate::signaling::protocol::{self, ClientFrame, InboundEvent, MembershipEvent};
use crate::signaling::{InboundReceiver, SignalingChannel};
use async_trait::async_trait;
use bytes::Bytes;
use futures::{Sink, SinkExt, Stream, StreamExt};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::{self, Message};
use tracing::{debug, info, warn};

enum Outgoing {
    Frame(String),
    Close,
}

#[derive(Default)]
struct ChannelState {
    connected: AtomicBool,
    closed_locally: AtomicBool,
    disconnect_reported: AtomicBool,
}

impl ChannelState {
    /// Сообщает о потере транспорта один раз, если закрыли не мы
    fn report_lost(&self, inbound: &mpsc::UnboundedSender<InboundEvent>) {
        self.connected.store(false, Ordering::SeqCst);
        if self.closed_locally.load(Ordering::SeqCst) {
            return;
        }
        if !self.disconnect_reported.swap(true, Ordering::SeqCst) {
            let _ = inbound.send(InboundEvent::Membership(MembershipEvent::Disconnected));
        }
    }
}

/// Канал сигнализации поверх WebSocket до сервера комнат.
///
/// Половинами сокета владеют насосы чтения и записи. Хэндл только ставит
/// кадры в очередь, поэтому отправка не блокирует задачу сессии.
pub struct WsSignalingChannel {
    outbound: mpsc::UnboundedSender<Outgoing>,
    state: Arc<ChannelState>,
}

impl WsSignalingChannel {
    pub async fn connect(
        url: &str,
        keepalive: KeepAlive,
    ) -> Result<(Self, InboundReceiver), SignalingError> {
        let (ws, _) = connect_async(url)
            .await
            .map_err(SignalingError::transport)?;
        info!(url, "connected to signaling server");

        let (sink, stream) = ws.split();
        Ok(Self::start(sink, stream, keepalive))
    }

    fn start<Si, St>(sink: Si, stream: St, keepalive: KeepAlive) -> (Self, InboundReceiver)
    where
        Si: Sink<Message, Error = tungstenite::Error> + Unpin + Send + 'static,
        St: Stream<Item = Result<Message, tungstenite::Error>> + Unpin + Send + 'static,
    {
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let (in_tx, in_rx) = mpsc::unbounded_channel();
        let state = Arc::new(ChannelState::default());
        state.connected.store(true, Ordering::SeqCst);

        tokio::spawn(read_pump(
            stream,
            in_tx.clone(),
            state.clone(),
            keepalive.pong_wait(),
        ));
        tokio::spawn(write_pump(sink, out_rx, in_tx, state.clone(), keepalive));

        (
            Self {
                outbound: out_tx,
                state,
            },
            in_rx,
        )
    }
}

async fn read_pump<St>(
    mut stream: St,
    inbound: mpsc::UnboundedSender<InboundEvent>,
    state: Arc<ChannelState>,
    pong_wait: Duration,
) where
    St: Stream<Item = Result<Message, tungstenite::Error>> + Unpin,
{
    loop {
        let msg = match timeout(pong_wait, stream.next()).await {
            Err(_) => {
                warn!("no frame from signaling server within {:?}", pong_wait);
                break;
            }
            Ok(None) => break,
            Ok(Some(Err(e))) => {
                warn!(error = %e, "signaling read failed");
                break;
            }
            Ok(Some(Ok(msg))) => msg,
        };

        match msg {
            Message::Text(text) => match protocol::decode(text.as_str()) {
                Ok(InboundEvent::Membership(MembershipEvent::Disconnected)) => {
                    state.report_lost(&inbound);
                }
                Ok(event) => {
                    debug!(?event, "signaling frame");
                    if inbound.send(event).is_err() {
                        break;
                    }
                }
                Err(e) => warn!(error = %e, "dropping signaling frame"),
            },
            Message::Close(_) => break,
            _ => {}
        }
    }
    state.report_lost(&inbound);
}

async fn send_with_deadline<Si>(
    sink: &mut Si,
    msg: Message,
    write_wait: Duration,
) -> Result<(), SignalingError>
where
    Si: Sink<Message, Error = tungstenite::Error> + Unpin,
{
    match timeout(write_wait, sink.send(msg)).await {
        Ok(res) => res.map_err(SignalingError::transport),
        Err(_) => Err(SignalingError::transport("write deadline exceeded")),
    }
}

async fn write_pump<Si>(
    mut sink: Si,
    mut outbound: mpsc::UnboundedReceiver<Outgoing>,
    inbound: mpsc::UnboundedSender<InboundEvent>,
    state: Arc<ChannelState>,
    keepalive: KeepAlive,
) where
    Si: Sink<Message, Error = tungstenite::Error> + Unpin,
{
    let write_wait = keepalive.write_wait();
    let mut ticker = tokio::time::interval(keepalive.ping_period());
    ticker.tick().await;

    loop {
        tokio::select! {
            cmd = outbound.recv() => match cmd {
                Some(Outgoing::Frame(text)) => {
                    if let Err(e) = send_with_deadline(&mut sink, Message::Text(text.into()), write_wait).await {
                        warn!(error = %e, "signaling write failed");
                        break;
                    }
                }
                Some(Outgoing::Close) | None => {
                    let _ = send_with_deadline(&mut sink, Message::Close(None), write_wait).await;
                    let _ = sink.close().await;
                    debug!("signaling write pump stopped");
                    break;
                }
            },
            _ = ticker.tick() => {
                if let Err(e) = send_with_deadline(&mut sink, Message::Ping(Bytes::new()), write_wait).await {
                    warn!(error = %e, "signaling ping failed");
                    break;
                }
            }
        }
    }
    state.report_lost(&inbound);
}

#[async_trait]
impl SignalingChannel for WsSignalingChannel {
    async fn send(&self, frame: ClientFrame) -> Result<(), SignalingError> {
        if !self.is_connected() {
            return Err(SignalingError::Closed);
        }
        let text = protocol::encode(&frame)?;
        self.outbound
            .send(Outgoing::Frame(text))
            .map_err(|_| SignalingError::Closed)
    }

    async fn disconnect(&self) {
        if self.state.closed_locally.swap(true, Ordering::SeqCst) {
            return;
        }
        self.state.connected.store(false, Ordering::SeqCst);
        let _ = self.outbound.send(Outgoing::Close);
        info!("signaling channel disconnected");
    }

    fn is_connected(&self) -> bool {
        self.state.connected.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signaling::protocol::{Envelope, SignalingMessage};
    use tokio::net::TcpListener;
    use tokio_tungstenite::accept_async;

    fn text(s: &str) -> Message {
        Message::Text(s.to_owned().into())
    }

    async fn server() -> (String, TcpListener) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}", listener.local_addr().unwrap());
        (url, listener)
    }

    #[tokio::test]
    async fn delivers_frames_in_order_and_reports_loss_once() {
        let (url, listener) = server().await;
        let srv = tokio::spawn(async move {
            let (tcp, _) = listener.accept().await.unwrap();
            let mut ws = accept_async(tcp).await.unwrap();

            let first = loop {
                match ws.next().await.unwrap().unwrap() {
                    Message::Text(t) => break t.as_str().to_owned(),
                    _ => continue,
                }
            };
            assert_eq!(first, r#"{"event":"join","room":"room42"}"#);

            ws.send(text(r#"{"event":"joined","room":"room42","id":"u1"}"#))
                .await
                .unwrap();
            ws.send(text(r#"{"event":"bogus"}"#)).await.unwrap();
            ws.send(text(
                r#"{"event":"message","room":"room42","data":{"cmd":"CMD_HANGUP"}}"#,
            ))
            .await
            .unwrap();
            // обрываем соединение без close frame
            drop(ws);
        });

        let (channel, mut inbound) = WsSignalingChannel::connect(&url, KeepAlive::default())
            .await
            .unwrap();
        channel
            .send(ClientFrame::Join {
                room: "room42".into(),
            })
            .await
            .unwrap();

        assert_eq!(
            inbound.recv().await.unwrap(),
            InboundEvent::Membership(MembershipEvent::Joined {
                room_id: "room42".into(),
                peer_id: Some("u1".into()),
            })
        );
        assert_eq!(
            inbound.recv().await.unwrap(),
            InboundEvent::Signal {
                room_id: Some("room42".into()),
                from: None,
                envelope: Envelope::Hangup,
            }
        );
        assert_eq!(
            inbound.recv().await.unwrap(),
            InboundEvent::Membership(MembershipEvent::Disconnected)
        );

        srv.await.unwrap();
        // оба насоса завершились, но событие было ровно одно
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(inbound.try_recv().is_err());
        assert!(!channel.is_connected());
        assert!(matches!(
            channel
                .send(ClientFrame::Message {
                    room: "room42".into(),
                    data: Envelope::webrtc(SignalingMessage::Offer { sdp: "v=0".into() }),
                })
                .await,
            Err(SignalingError::Closed)
        ));
    }

    #[tokio::test]
    async fn local_disconnect_is_not_reported() {
        let (url, listener) = server().await;
        let srv = tokio::spawn(async move {
            let (tcp, _) = listener.accept().await.unwrap();
            let mut ws = accept_async(tcp).await.unwrap();
            // ждём close frame от клиента
            while let Some(Ok(msg)) = ws.next().await {
                if msg.is_close() {
                    break;
                }
            }
        });

        let (channel, mut inbound) = WsSignalingChannel::connect(&url, KeepAlive::default())
            .await
            .unwrap();
        channel.disconnect().await;
        channel.disconnect().await;
        srv.await.unwrap();

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(inbound.try_recv().is_err());
        assert!(!channel.is_connected());
    }
}
