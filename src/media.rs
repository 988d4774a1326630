//! Local capture stream and its binding to the preview and the negotiation.

use crate::error::{Error, Result};
use crate::peer::negotiation::NegotiationEngine;
use crate::peer::types::TrackKind;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_local::TrackLocal;

/// One captured track. The capture owner writes samples into `rtc_track`.
pub struct LocalTrack {
    id: String,
    kind: TrackKind,
    rtc: Arc<TrackLocalStaticSample>,
    stopped: AtomicBool,
}

impl LocalTrack {
    pub fn new(kind: TrackKind, id: impl Into<String>, stream_id: impl Into<String>) -> Self {
        let id = id.into();
        let codec = match kind {
            TrackKind::Audio => RTCRtpCodecCapability {
                mime_type: "audio/opus".to_string(),
                clock_rate: 48000,
                channels: 2,
                ..Default::default()
            },
            TrackKind::Video => RTCRtpCodecCapability {
                mime_type: "video/VP8".to_string(),
                clock_rate: 90000,
                ..Default::default()
            },
        };
        let rtc = Arc::new(TrackLocalStaticSample::new(codec, id.clone(), stream_id.into()));
        Self {
            id,
            kind,
            rtc,
            stopped: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn kind(&self) -> TrackKind {
        self.kind
    }

    pub fn rtc_track(&self) -> Arc<dyn TrackLocal + Send + Sync> {
        self.rtc.clone()
    }

    pub fn sample_track(&self) -> Arc<TrackLocalStaticSample> {
        self.rtc.clone()
    }

    pub fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }
}

/// Already-initialized capture stream handed in by the embedding application.
#[derive(Clone)]
pub struct LocalStream {
    id: String,
    tracks: Vec<Arc<LocalTrack>>,
}

impl LocalStream {
    pub fn new(id: impl Into<String>, tracks: Vec<Arc<LocalTrack>>) -> Self {
        Self {
            id: id.into(),
            tracks,
        }
    }

    /// One opus audio track and one VP8 video track.
    pub fn camera_and_microphone(id: impl Into<String>) -> Self {
        let id = id.into();
        let tracks = vec![
            Arc::new(LocalTrack::new(TrackKind::Audio, format!("{id}-audio"), id.clone())),
            Arc::new(LocalTrack::new(TrackKind::Video, format!("{id}-video"), id.clone())),
        ];
        Self { id, tracks }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn tracks(&self) -> &[Arc<LocalTrack>] {
        &self.tracks
    }

    pub fn video_tracks(&self) -> impl Iterator<Item = &Arc<LocalTrack>> {
        self.tracks.iter().filter(|t| t.kind() == TrackKind::Video)
    }
}

/// Where the local preview is rendered.
pub trait PreviewSurface: Send + Sync {
    fn attach(&self, stream: &LocalStream);
}

/// Preview sink for headless embeddings.
pub struct NoPreview;

impl PreviewSurface for NoPreview {
    fn attach(&self, _stream: &LocalStream) {}
}

pub struct LocalMediaBinder {
    stream: Option<LocalStream>,
    preview: Arc<dyn PreviewSurface>,
    released: bool,
}

impl LocalMediaBinder {
    pub fn new(preview: Arc<dyn PreviewSurface>) -> Self {
        Self {
            stream: None,
            preview,
            released: false,
        }
    }

    /// Stores the capture stream and shows it in the local preview.
    /// Returns false when a stream is already bound or the binder was released.
    pub fn bind(&mut self, stream: LocalStream) -> bool {
        if self.released {
            warn!("Capture stream {} arrived after release, ignoring", stream.id());
            return false;
        }
        if self.stream.is_some() {
            warn!("Capture stream already bound, ignoring {}", stream.id());
            return false;
        }
        info!(
            "Binding capture stream {} with {} tracks",
            stream.id(),
            stream.tracks().len()
        );
        self.preview.attach(&stream);
        self.stream = Some(stream);
        true
    }

    pub fn is_bound(&self) -> bool {
        self.stream.is_some() && !self.released
    }

    pub fn stream(&self) -> Option<&LocalStream> {
        self.stream.as_ref()
    }

    /// Adds every local track to the engine's peer connection.
    pub async fn attach_to_negotiation(&self, engine: &NegotiationEngine) -> Result<usize> {
        let stream = match (&self.stream, self.released) {
            (Some(stream), false) => stream,
            _ => return Err(Error::CaptureUnavailable),
        };
        for track in stream.tracks() {
            engine.add_local_track(track.clone()).await?;
        }
        engine.mark_tracks_attached();
        debug!(
            "Attached {} local tracks to session {}",
            stream.tracks().len(),
            engine.id()
        );
        Ok(stream.tracks().len())
    }

    /// Stops the video tracks to free the camera. Only the first call has an effect.
    pub fn release(&mut self) -> bool {
        if self.released {
            debug!("Capture already released");
            return false;
        }
        self.released = true;
        if let Some(stream) = &self.stream {
            for track in stream.video_tracks() {
                track.stop();
            }
            info!("Released capture stream {}", stream.id());
        }
        true
    }
}
