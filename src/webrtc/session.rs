use crate::connection::EventSink;
use crate::errors::LinkError;
use crate::signaling::CandidatePayload;
use crate::webrtc::peer::{IceConnectionState, PeerConnector, PeerEvent, PeerSession};
use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::{MediaEngine, MIME_TYPE_OPUS};
use webrtc::api::APIBuilder;
use webrtc::data_channel::data_channel_init::RTCDataChannelInit;
use webrtc::data_channel::data_channel_message::DataChannelMessage;
use webrtc::data_channel::data_channel_state::RTCDataChannelState;
use webrtc::data_channel::RTCDataChannel;
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::ice_transport::ice_connection_state::RTCIceConnectionState;
use webrtc::ice_transport::ice_gatherer_state::RTCIceGathererState;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;
use webrtc::rtp_transceiver::rtp_sender::RTCRtpSender;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_local::TrackLocal;

pub const AUDIO_TRACK_ID: &str = "iris-audio-track";
pub const STREAM_ID: &str = "iris-stream";
pub const COMMAND_CHANNEL_LABEL: &str = "cmd";

const PEER_CLOSE_GRACE: Duration = Duration::from_secs(2);

/// Everything one peer session owns. Any member may be missing when
/// construction stopped part way.
#[derive(Default)]
struct PeerResources {
    peer_connection: Option<Arc<RTCPeerConnection>>,
    audio_track: Option<Arc<TrackLocalStaticSample>>,
    audio_sender: Option<Arc<RTCRtpSender>>,
    command_channel: Option<Arc<RTCDataChannel>>,
    pending_commands: Vec<String>,
}

impl PeerResources {
    /// Release in order: command channel, peer connection, audio track,
    /// audio sender.
    async fn release(self) {
        if let Some(channel) = self.command_channel {
            if let Err(e) = channel.close().await {
                log::debug!("Closing command channel failed: {}", e);
            }
        }
        if let Some(pc) = self.peer_connection {
            match tokio::time::timeout(PEER_CLOSE_GRACE, pc.close()).await {
                Ok(Err(e)) => log::debug!("Closing peer connection failed: {}", e),
                Err(_) => log::warn!("Peer connection did not close within grace period"),
                Ok(Ok(())) => {}
            }
        }
        drop(self.audio_track);
        if let Some(sender) = self.audio_sender {
            if let Err(e) = sender.stop().await {
                log::debug!("Stopping audio sender failed: {}", e);
            }
        }
    }
}

/// Peer session on top of webrtc-rs.
pub struct WebRtcPeer {
    resources: Arc<Mutex<PeerResources>>,
}

impl WebRtcPeer {
    /// Build the peer connection, attach the audio track and open the
    /// command channel. Callbacks report through `events`.
    pub async fn new(ice_servers: &[String], events: EventSink) -> Result<Self, LinkError> {
        let resources = Arc::new(Mutex::new(PeerResources::default()));
        let peer = Self {
            resources: Arc::clone(&resources),
        };

        // On any error below, whatever was already stored is released by close().
        if let Err(err) = peer.build(ice_servers, &events).await {
            peer.close().await;
            return Err(err);
        }

        Ok(peer)
    }

    async fn build(&self, ice_servers: &[String], events: &EventSink) -> Result<(), LinkError> {
        let mut media_engine = MediaEngine::default();
        media_engine.register_default_codecs()?;
        let registry = register_default_interceptors(Registry::new(), &mut media_engine)?;
        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();

        let config = RTCConfiguration {
            ice_servers: ice_servers
                .iter()
                .map(|url| RTCIceServer {
                    urls: vec![url.clone()],
                    ..Default::default()
                })
                .collect(),
            ..Default::default()
        };

        events.log().info("Creating RTCPeerConnection");
        let pc = Arc::new(api.new_peer_connection(config).await?);
        self.with_resources(|r| r.peer_connection = Some(Arc::clone(&pc)));
        self.install_observers(&pc, events);

        let track = Arc::new(TrackLocalStaticSample::new(
            RTCRtpCodecCapability {
                mime_type: MIME_TYPE_OPUS.to_owned(),
                ..Default::default()
            },
            AUDIO_TRACK_ID.to_owned(),
            STREAM_ID.to_owned(),
        ));
        self.with_resources(|r| r.audio_track = Some(Arc::clone(&track)));
        let sender = pc
            .add_track(Arc::clone(&track) as Arc<dyn TrackLocal + Send + Sync>)
            .await?;
        self.with_resources(|r| r.audio_sender = Some(sender));

        let init = RTCDataChannelInit {
            ordered: Some(true),
            ..Default::default()
        };
        let channel = pc.create_data_channel(COMMAND_CHANNEL_LABEL, Some(init)).await?;
        watch_data_channel(&channel, &self.resources, events);
        self.with_resources(|r| r.command_channel = Some(channel));
        events
            .log()
            .info(format!("Created local data channel: {}", COMMAND_CHANNEL_LABEL));

        Ok(())
    }

    fn install_observers(&self, pc: &Arc<RTCPeerConnection>, events: &EventSink) {
        let sink = events.clone();
        pc.on_ice_connection_state_change(Box::new(move |state: RTCIceConnectionState| {
            sink.peer(PeerEvent::IceConnectionChanged(IceConnectionState::from(state)));
            Box::pin(async {})
        }));

        let sink = events.clone();
        pc.on_ice_gathering_state_change(Box::new(move |state: RTCIceGathererState| {
            sink.peer(PeerEvent::IceGatheringChanged(state.to_string().to_uppercase()));
            Box::pin(async {})
        }));

        let sink = events.clone();
        pc.on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
            if let Some(candidate) = candidate {
                match candidate.to_json() {
                    Ok(init) => sink.peer(PeerEvent::LocalCandidate(CandidatePayload {
                        candidate: init.candidate,
                        sdp_mid: init.sdp_mid,
                        sdp_mline_index: init.sdp_mline_index.unwrap_or(0),
                    })),
                    Err(e) => log::debug!("Dropping unserializable local candidate: {}", e),
                }
            }
            Box::pin(async {})
        }));

        // A channel opened by the server takes over the command slot.
        let sink = events.clone();
        let resources = Arc::clone(&self.resources);
        pc.on_data_channel(Box::new(move |channel: Arc<RTCDataChannel>| {
            sink.peer(PeerEvent::DataChannelOpened {
                label: channel.label().to_string(),
            });
            watch_data_channel(&channel, &resources, &sink);
            if let Ok(mut r) = resources.lock() {
                r.command_channel = Some(channel);
            }
            Box::pin(async {})
        }));
    }

    fn with_resources<R>(&self, f: impl FnOnce(&mut PeerResources) -> R) -> R {
        let mut guard = match self.resources.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        f(&mut guard)
    }

    fn peer_connection(&self) -> Result<Arc<RTCPeerConnection>, LinkError> {
        self.with_resources(|r| r.peer_connection.clone())
            .ok_or_else(|| LinkError::PeerError("peer connection is closed".to_string()))
    }
}

fn watch_data_channel(
    channel: &Arc<RTCDataChannel>,
    resources: &Arc<Mutex<PeerResources>>,
    events: &EventSink,
) {
    let label = channel.label().to_string();

    let sink = events.clone();
    let open_label = label.clone();
    let weak_channel = Arc::downgrade(channel);
    let weak_resources = Arc::downgrade(resources);
    channel.on_open(Box::new(move || {
        sink.peer(PeerEvent::DataChannelStateChanged {
            label: open_label,
            state: "OPEN".to_string(),
        });
        // Commands issued before the channel opened go out now.
        let pending = match weak_resources.upgrade() {
            Some(resources) => {
                let mut guard = match resources.lock() {
                    Ok(guard) => guard,
                    Err(poisoned) => poisoned.into_inner(),
                };
                std::mem::take(&mut guard.pending_commands)
            }
            None => Vec::new(),
        };
        Box::pin(async move {
            if let Some(channel) = weak_channel.upgrade() {
                for payload in pending {
                    if let Err(e) = channel.send_text(payload).await {
                        log::warn!("Failed to flush queued command: {}", e);
                    }
                }
            }
        })
    }));

    let sink = events.clone();
    let close_label = label.clone();
    channel.on_close(Box::new(move || {
        sink.peer(PeerEvent::DataChannelStateChanged {
            label: close_label.clone(),
            state: "CLOSED".to_string(),
        });
        Box::pin(async {})
    }));

    let sink = events.clone();
    channel.on_message(Box::new(move |message: DataChannelMessage| {
        sink.peer(PeerEvent::DataChannelMessage {
            label: label.clone(),
            payload: message.data,
        });
        Box::pin(async {})
    }));
}

#[async_trait]
impl PeerSession for WebRtcPeer {
    async fn create_offer(&self) -> Result<String, LinkError> {
        let pc = self.peer_connection()?;
        let offer = pc.create_offer(None).await?;
        pc.set_local_description(offer.clone()).await?;
        Ok(offer.sdp)
    }

    async fn apply_remote_answer(&self, sdp: String) -> Result<(), LinkError> {
        let pc = self.peer_connection()?;
        let answer = RTCSessionDescription::answer(sdp)?;
        pc.set_remote_description(answer).await?;
        Ok(())
    }

    async fn add_remote_candidate(&self, candidate: CandidatePayload) {
        let Ok(pc) = self.peer_connection() else {
            return;
        };
        let init = RTCIceCandidateInit {
            sdp_mid: Some(candidate.mid().to_string()),
            sdp_mline_index: Some(candidate.sdp_mline_index),
            candidate: candidate.candidate,
            username_fragment: None,
        };
        if let Err(e) = pc.add_ice_candidate(init).await {
            log::debug!("Remote ICE candidate dropped: {}", e);
        }
    }

    async fn send_command(&self, payload: String) -> Result<(), LinkError> {
        let channel = self.with_resources(|r| {
            match &r.command_channel {
                Some(channel) if channel.ready_state() == RTCDataChannelState::Open => {
                    Ok(Some(Arc::clone(channel)))
                }
                Some(_) => {
                    r.pending_commands.push(payload.clone());
                    Ok(None)
                }
                None => Err(LinkError::PeerError("command channel is not available".to_string())),
            }
        })?;

        if let Some(channel) = channel {
            channel.send_text(payload).await?;
        }
        Ok(())
    }

    async fn close(&self) {
        let bundle = self.with_resources(std::mem::take);
        bundle.release().await;
    }
}

/// Production [`PeerConnector`].
#[derive(Debug, Clone, Default)]
pub struct WebRtcConnector;

impl WebRtcConnector {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl PeerConnector for WebRtcConnector {
    async fn create_session(
        &self,
        ice_servers: &[String],
        events: EventSink,
    ) -> Result<Arc<dyn PeerSession>, LinkError> {
        let peer = WebRtcPeer::new(ice_servers, events).await?;
        Ok(Arc::new(peer))
    }
}
