//! H.264/MP4 container using openh264 for encoding and muxide for muxing

use std::fs::File;
use std::io::BufWriter;
use std::path::Path;

use muxide::api::{Metadata, MuxerBuilder, VideoCodec};
use openh264::encoder::{BitRate, Encoder, EncoderConfig, FrameRate, FrameType};
use openh264::formats::YUVBuffer;
use openh264::OpenH264API;

use super::config::{ContainerStats, RecordingConfig};
use super::container::{check_geometry, create_new_file, ContainerFactory, ContainerWriter};
use super::yuv::rgb_to_yuv420;
use crate::errors::CameraError;
use crate::types::Frame;

pub struct Mp4Container;

/// Encoder settings from the recording quality.
fn encoder_config(config: &RecordingConfig) -> EncoderConfig {
    EncoderConfig::new()
        .bitrate(BitRate::from_bps(config.bitrate))
        .max_frame_rate(FrameRate::from_hz(config.fps.max(1) as f32))
}

impl ContainerFactory for Mp4Container {
    fn extension(&self) -> &'static str {
        "mp4"
    }

    fn create(
        &self,
        path: &Path,
        config: &RecordingConfig,
    ) -> Result<Box<dyn ContainerWriter>, CameraError> {
        let file = create_new_file(path)?;
        let writer = BufWriter::new(file);

        let fps = f64::from(config.fps.max(1));
        let encoder = Encoder::with_api_config(OpenH264API::from_source(), encoder_config(config))
            .map_err(|e| CameraError::Encoding(format!("Failed to create encoder: {}", e)))?;

        let mut metadata = Metadata::new().with_current_time();
        if let Some(ref title) = config.title {
            metadata = metadata.with_title(title);
        }

        let muxer = MuxerBuilder::new(writer)
            .video(VideoCodec::H264, config.width, config.height, fps)
            .with_fast_start(config.fast_start)
            .with_metadata(metadata)
            .build()
            .map_err(|e| CameraError::Encoding(format!("Failed to create muxer: {}", e)))?;

        Ok(Box::new(Mp4Writer {
            encoder,
            muxer,
            config: config.clone(),
            frame_count: 0,
            frame_duration_secs: 1.0 / fps,
        }))
    }
}

struct Mp4Writer {
    encoder: Encoder,
    muxer: muxide::api::Muxer<BufWriter<File>>,
    config: RecordingConfig,
    frame_count: u64,
    frame_duration_secs: f64,
}

impl ContainerWriter for Mp4Writer {
    fn write(&mut self, frame: &Frame) -> Result<(), CameraError> {
        check_geometry(frame, &self.config)?;

        let yuv = rgb_to_yuv420(&frame.rgb_bytes(), frame.width, frame.height);
        let yuv_buffer = YUVBuffer::from_vec(yuv, frame.width as usize, frame.height as usize);

        let bitstream = self
            .encoder
            .encode(&yuv_buffer)
            .map_err(|e| CameraError::Encoding(format!("Encoding failed: {}", e)))?;
        let is_keyframe = matches!(bitstream.frame_type(), FrameType::IDR | FrameType::I);
        let data = bitstream.to_vec();

        // Skipped pictures still advance the timeline so later frames keep their slot.
        if !data.is_empty() {
            let pts = self.frame_count as f64 * self.frame_duration_secs;
            self.muxer
                .write_video(pts, &data, is_keyframe)
                .map_err(|e| CameraError::Encoding(format!("Failed to write frame: {}", e)))?;
        }
        self.frame_count += 1;
        Ok(())
    }

    fn finish(self: Box<Self>) -> Result<ContainerStats, CameraError> {
        let frame_count = self.frame_count;
        let stats = self
            .muxer
            .finish_with_stats()
            .map_err(|e| CameraError::Encoding(format!("Failed to finalize recording: {}", e)))?;

        Ok(ContainerStats {
            frames_written: frame_count,
            bytes_written: stats.bytes_written,
            duration_secs: stats.duration_secs,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::PooledBuffer;
    use crate::types::PixelLayout;

    #[test]
    fn test_quality_sets_encoder_bitrate() {
        use crate::recording::RecordingQuality;

        let low = RecordingConfig::new(320, 240, 30).with_bitrate(RecordingQuality::Low.bitrate());
        let high = RecordingConfig::new(320, 240, 30).with_bitrate(RecordingQuality::High.bitrate());
        assert!(high.bitrate > low.bitrate);

        let dir = tempfile::tempdir().unwrap();
        for (name, config) in [("low.mp4", low), ("high.mp4", high)] {
            let writer = Mp4Container
                .create(&dir.path().join(name), &config)
                .expect("encoder accepts the quality bitrate");
            writer.finish().expect("finish");
        }
    }

    #[test]
    fn test_record_frames() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cam0.mp4");
        let config = RecordingConfig::new(320, 240, 30).with_title("Test Recording");

        let mut writer = Mp4Container.create(&path, &config).expect("create mp4");
        for i in 0..30u64 {
            let gray = (i * 8) as u8;
            let frame = Frame::new(
                0,
                i,
                0,
                320,
                240,
                PixelLayout::Rgb8,
                PooledBuffer::detached(vec![gray; 320 * 240 * 3]),
            );
            writer.write(&frame).expect("write frame");
        }
        let stats = writer.finish().expect("finish");

        assert_eq!(stats.frames_written, 30);
        assert!(stats.bytes_written > 0);
        assert!(std::fs::metadata(&path).unwrap().len() > 0);
    }
}
