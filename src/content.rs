//! Content API data model: what the poll client and push server both speak.
//!
//! Bits are packed row-major, little-endian within each byte (bit `i` of a
//! row lives at `byte i/8`, position `i%8`; the top-left pixel is the LSB of
//! byte 0). `Frame::data_b64` carries that packed data as base64 over JSON.

use base64::Engine;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::ContentError;
use crate::limits::ContentLimits;

const B64: base64::engine::GeneralPurpose = base64::engine::general_purpose::STANDARD;

/// Opaque debugging metadata attached to a frame or a content item.
pub type Metadata = HashMap<String, serde_json::Value>;

fn metadata_byte_len(m: &Option<Metadata>) -> usize {
    match m {
        Some(m) => serde_json::to_vec(m).map(|v| v.len()).unwrap_or(0),
        None => 0,
    }
}

/// A single frame to display, with optional timing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Frame {
    pub data_b64: String,
    pub width: u32,
    pub height: u32,
    /// How long to show this frame. `None` or `0` means indefinitely.
    #[serde(default)]
    pub duration_ms: Option<u32>,
    #[serde(default)]
    pub metadata: Option<Metadata>,
}

impl Frame {
    pub fn decode_data(&self) -> Result<Vec<u8>, ContentError> {
        B64.decode(&self.data_b64)
            .map_err(|e| ContentError::InvalidBase64(e.to_string()))
    }

    /// Unpack to a row-major matrix of 0/1, per the frame's own `width`/`height`.
    pub fn to_matrix(&self) -> Result<Vec<Vec<u8>>, ContentError> {
        let data = self.decode_data()?;
        let mut matrix = Vec::with_capacity(self.height as usize);
        let mut bit_idx: usize = 0;
        for _ in 0..self.height {
            let mut row = Vec::with_capacity(self.width as usize);
            for _ in 0..self.width {
                let byte_idx = bit_idx / 8;
                let bit_pos = bit_idx % 8;
                let bit = data
                    .get(byte_idx)
                    .map(|b| (b >> bit_pos) & 1)
                    .unwrap_or(0);
                row.push(bit);
                bit_idx += 1;
            }
            matrix.push(row);
        }
        Ok(matrix)
    }

    pub(crate) fn effective_duration(&self) -> u32 {
        self.duration_ms.unwrap_or(0)
    }
}

/// Playback rules for a content sequence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlaybackMode {
    #[serde(rename = "loop", default)]
    pub looped: bool,
    #[serde(default)]
    pub loop_count: Option<u32>,
    #[serde(default)]
    pub priority: u8,
    #[serde(default = "default_interruptible")]
    pub interruptible: bool,
}

fn default_interruptible() -> bool {
    true
}

impl Default for PlaybackMode {
    fn default() -> Self {
        Self {
            looped: false,
            loop_count: None,
            priority: 0,
            interruptible: true,
        }
    }
}

impl PlaybackMode {
    fn validate(&self) -> Result<(), ContentError> {
        if self.priority > 99 {
            return Err(ContentError::PriorityOutOfRange(self.priority));
        }
        if self.loop_count.is_some() && !self.looped {
            return Err(ContentError::LoopCountWithoutLoop);
        }
        if self.loop_count == Some(0) {
            return Err(ContentError::LoopCountNotPositive);
        }
        Ok(())
    }
}

/// An ordered sequence of frames with playback instructions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Content {
    pub content_id: String,
    pub frames: Vec<Frame>,
    #[serde(default)]
    pub playback: PlaybackMode,
    #[serde(default)]
    pub metadata: Option<Metadata>,
}

impl Content {
    /// Validate frame-count, dimension-consistency, and byte-size bounds.
    /// Must be called on every `Content` before it is admitted to the queue —
    /// construction alone (deserialization) does not enforce these.
    pub fn validate(&self, limits: &ContentLimits) -> Result<(), ContentError> {
        if self.frames.is_empty() {
            return Err(ContentError::EmptyFrames);
        }
        if self.frames.len() > limits.max_frames_per_content {
            return Err(ContentError::TooManyFrames {
                count: self.frames.len(),
                limit: limits.max_frames_per_content,
            });
        }

        self.playback.validate()?;

        let (width, height) = (self.frames[0].width, self.frames[0].height);
        let mut total_bytes = 0usize;

        for (i, frame) in self.frames.iter().enumerate() {
            if i > 0 && (frame.width != width || frame.height != height) {
                return Err(ContentError::FrameDimensionMismatch {
                    index: i,
                    width: frame.width,
                    height: frame.height,
                    expected_width: width,
                    expected_height: height,
                });
            }
            total_bytes += frame.decode_data()?.len();

            let meta_len = metadata_byte_len(&frame.metadata);
            if meta_len > limits.max_metadata_bytes {
                return Err(ContentError::MetadataTooLarge {
                    bytes: meta_len,
                    limit: limits.max_metadata_bytes,
                });
            }
            total_bytes += meta_len;
        }

        let content_meta_len = metadata_byte_len(&self.metadata);
        if content_meta_len > limits.max_metadata_bytes {
            return Err(ContentError::MetadataTooLarge {
                bytes: content_meta_len,
                limit: limits.max_metadata_bytes,
            });
        }
        total_bytes += content_meta_len;

        if total_bytes > limits.max_total_bytes {
            return Err(ContentError::TooLarge {
                bytes: total_bytes,
                limit: limits.max_total_bytes,
            });
        }

        Ok(())
    }

    /// Validate that this content's frame dimensions match the physical display.
    pub fn validate_display_dimensions(
        &self,
        display_width: u32,
        display_height: u32,
    ) -> Result<(), ContentError> {
        if let Some(frame) = self.frames.first() {
            if frame.width != display_width || frame.height != display_height {
                return Err(ContentError::DisplayDimensionMismatch {
                    content_id: self.content_id.clone(),
                    frame_width: frame.width,
                    frame_height: frame.height,
                    display_width,
                    display_height,
                });
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseStatus {
    Updated,
    NoChange,
    Clear,
}

/// Response from the content server to a single poll.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentResponse {
    pub status: ResponseStatus,
    #[serde(default)]
    pub content: Option<Content>,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u32,
}

fn default_poll_interval_ms() -> u32 {
    30_000
}

impl ContentResponse {
    pub fn validate(&self) -> Result<(), ContentError> {
        if self.poll_interval_ms < 1000 {
            return Err(ContentError::PollIntervalTooShort(self.poll_interval_ms));
        }
        if self.status == ResponseStatus::Updated && self.content.is_none() {
            return Err(ContentError::MissingContentForUpdatedStatus);
        }
        Ok(())
    }

    pub fn clear(poll_interval_ms: u32) -> Self {
        Self {
            status: ResponseStatus::Clear,
            content: None,
            poll_interval_ms,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthType {
    Bearer,
    ApiKey,
}

/// Shared authentication material for both outbound poll requests and the
/// inbound push endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    #[serde(rename = "type", default = "default_auth_type")]
    pub auth_type: AuthType,
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default)]
    pub key: Option<String>,
    #[serde(default = "default_header_name")]
    pub header_name: String,
}

fn default_auth_type() -> AuthType {
    AuthType::ApiKey
}

fn default_header_name() -> String {
    "X-API-Key".to_string()
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            auth_type: default_auth_type(),
            token: None,
            key: None,
            header_name: default_header_name(),
        }
    }
}

/// What to do when the server is unreachable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorFallback {
    KeepLast,
    Blank,
    ErrorMessage,
}

impl Default for ErrorFallback {
    fn default() -> Self {
        ErrorFallback::KeepLast
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(w: u32, h: u32, dur: Option<u32>) -> Frame {
        let bytes = vec![0u8; ((w * h) as usize).div_ceil(8)];
        Frame {
            data_b64: B64.encode(bytes),
            width: w,
            height: h,
            duration_ms: dur,
            metadata: None,
        }
    }

    #[test]
    fn rejects_empty_frames() {
        let c = Content {
            content_id: "x".into(),
            frames: vec![],
            playback: PlaybackMode::default(),
            metadata: None,
        };
        assert_eq!(
            c.validate(&ContentLimits::default()),
            Err(ContentError::EmptyFrames)
        );
    }

    #[test]
    fn rejects_mismatched_frame_dimensions() {
        let c = Content {
            content_id: "x".into(),
            frames: vec![frame(8, 8, Some(100)), frame(4, 4, Some(100))],
            playback: PlaybackMode::default(),
            metadata: None,
        };
        assert!(matches!(
            c.validate(&ContentLimits::default()),
            Err(ContentError::FrameDimensionMismatch { index: 1, .. })
        ));
    }

    #[test]
    fn rejects_too_many_frames() {
        let limits = ContentLimits {
            max_frames_per_content: 2,
            ..ContentLimits::default()
        };
        let c = Content {
            content_id: "x".into(),
            frames: vec![frame(8, 8, None); 3],
            playback: PlaybackMode::default(),
            metadata: None,
        };
        assert!(matches!(
            c.validate(&limits),
            Err(ContentError::TooManyFrames { count: 3, limit: 2 })
        ));
    }

    #[test]
    fn rejects_loop_count_without_loop() {
        let c = Content {
            content_id: "x".into(),
            frames: vec![frame(8, 8, None)],
            playback: PlaybackMode {
                looped: false,
                loop_count: Some(3),
                priority: 0,
                interruptible: true,
            },
            metadata: None,
        };
        assert_eq!(
            c.validate(&ContentLimits::default()),
            Err(ContentError::LoopCountWithoutLoop)
        );
    }

    #[test]
    fn accepts_well_formed_content() {
        let c = Content {
            content_id: "x".into(),
            frames: vec![frame(8, 8, Some(500)), frame(8, 8, Some(500))],
            playback: PlaybackMode {
                looped: true,
                loop_count: Some(2),
                priority: 10,
                interruptible: true,
            },
            metadata: None,
        };
        assert!(c.validate(&ContentLimits::default()).is_ok());
    }

    #[test]
    fn response_requires_content_when_updated() {
        let r = ContentResponse {
            status: ResponseStatus::Updated,
            content: None,
            poll_interval_ms: 5000,
        };
        assert_eq!(
            r.validate(),
            Err(ContentError::MissingContentForUpdatedStatus)
        );
    }

    #[test]
    fn response_rejects_short_poll_interval() {
        let r = ContentResponse {
            status: ResponseStatus::NoChange,
            content: None,
            poll_interval_ms: 999,
        };
        assert_eq!(r.validate(), Err(ContentError::PollIntervalTooShort(999)));
    }

    #[test]
    fn frame_roundtrips_through_bit_packing() {
        // A 3x2 frame with a single set bit at (row=1, col=2): bit index 5.
        let f = Frame {
            data_b64: B64.encode([0b0010_0000u8]),
            width: 3,
            height: 2,
            duration_ms: None,
            metadata: None,
        };
        let m = f.to_matrix().unwrap();
        assert_eq!(m, vec![vec![0, 0, 0], vec![0, 0, 1]]);
    }

    #[test]
    fn rejects_zero_loop_count() {
        let c = Content {
            content_id: "x".into(),
            frames: vec![frame(8, 8, None)],
            playback: PlaybackMode {
                looped: true,
                loop_count: Some(0),
                priority: 0,
                interruptible: true,
            },
            metadata: None,
        };
        assert_eq!(
            c.validate(&ContentLimits::default()),
            Err(ContentError::LoopCountNotPositive)
        );
    }

    #[test]
    fn content_json_roundtrip_preserves_metadata() {
        let mut frame_meta = Metadata::new();
        frame_meta.insert("label".to_string(), serde_json::json!("frame-a"));
        let mut content_meta = Metadata::new();
        content_meta.insert("source".to_string(), serde_json::json!("sensor-7"));
        content_meta.insert("count".to_string(), serde_json::json!(3));

        let c = Content {
            content_id: "clock".into(),
            frames: vec![Frame {
                data_b64: B64.encode([0xAAu8]),
                width: 8,
                height: 1,
                duration_ms: Some(250),
                metadata: Some(frame_meta),
            }],
            playback: PlaybackMode {
                looped: true,
                loop_count: Some(5),
                priority: 7,
                interruptible: false,
            },
            metadata: Some(content_meta),
        };

        let json = serde_json::to_string(&c).unwrap();
        let round_tripped: Content = serde_json::from_str(&json).unwrap();

        assert_eq!(round_tripped.content_id, c.content_id);
        assert_eq!(round_tripped.frames.len(), c.frames.len());
        assert_eq!(round_tripped.frames[0].data_b64, c.frames[0].data_b64);
        assert_eq!(round_tripped.frames[0].duration_ms, c.frames[0].duration_ms);
        assert_eq!(round_tripped.frames[0].metadata, c.frames[0].metadata);
        assert_eq!(round_tripped.playback.looped, c.playback.looped);
        assert_eq!(round_tripped.playback.loop_count, c.playback.loop_count);
        assert_eq!(round_tripped.playback.priority, c.playback.priority);
        assert_eq!(round_tripped.playback.interruptible, c.playback.interruptible);
        assert_eq!(round_tripped.metadata, c.metadata);

        // The wire form uses `loop`, not `looped`.
        assert!(json.contains("\"loop\":true"));
    }

    #[test]
    fn effective_duration_defaults_to_zero() {
        assert_eq!(frame(1, 1, None).effective_duration(), 0);
        assert_eq!(frame(1, 1, Some(0)).effective_duration(), 0);
        assert_eq!(frame(1, 1, Some(250)).effective_duration(), 250);
    }
}
