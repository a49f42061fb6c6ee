use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use crate::shared::frame::Frame;
use crate::source::domain::frame_source::{FrameSource, FrameSourceError, PlaybackControl};

/// Decodes a video file one frame per `next_frame` call via ffmpeg-next.
///
/// Frames are converted to RGB24. Nothing is decoded ahead of the caller.
/// With real-time pacing enabled, `next_frame` waits until the frame's
/// presentation time relative to the first pull.
pub struct VideoFileSource {
    path: PathBuf,
    decoding: Option<Decoding>,
    control: PlaybackControl,
    realtime: bool,
    started: Option<Instant>,
}

struct Decoding {
    ictx: ffmpeg_next::format::context::Input,
    decoder: ffmpeg_next::decoder::Video,
    scaler: ffmpeg_next::software::scaling::Context,
    width: u32,
    height: u32,
    stream_index: usize,
    fps: f64,
    time_base: ffmpeg_next::Rational,
    frame_index: u64,
    flushing: bool,
    done: bool,
}

impl VideoFileSource {
    pub fn open(path: impl AsRef<Path>, control: PlaybackControl) -> Result<Self, FrameSourceError> {
        let path = path.as_ref().to_path_buf();
        let decoding = open_decoding(&path).map_err(|e| FrameSourceError::Open {
            path: path.clone(),
            reason: e.to_string(),
        })?;
        log::info!(
            "Opened video {} ({}x{} @ {:.2} fps)",
            path.display(),
            decoding.width,
            decoding.height,
            decoding.fps
        );
        Ok(Self {
            path,
            decoding: Some(decoding),
            control,
            realtime: false,
            started: None,
        })
    }

    /// Paces frames at the stream's frame rate instead of decoding flat out.
    pub fn with_realtime(mut self, realtime: bool) -> Self {
        self.realtime = realtime;
        self
    }

    pub fn fps(&self) -> Option<f64> {
        self.decoding.as_ref().map(|d| d.fps)
    }

    pub fn dimensions(&self) -> Option<(u32, u32)> {
        self.decoding.as_ref().map(|d| (d.width, d.height))
    }

    fn pace(&mut self, index: u64, fps: f64) {
        if !self.realtime || fps <= 0.0 {
            return;
        }
        let started = *self.started.get_or_insert_with(Instant::now);
        let due = started + Duration::from_secs_f64(index as f64 / fps);
        let now = Instant::now();
        if due > now {
            std::thread::sleep(due - now);
        }
    }
}

fn open_decoding(path: &Path) -> Result<Decoding, Box<dyn std::error::Error>> {
    ffmpeg_next::init()?;

    let ictx = ffmpeg_next::format::input(path)?;
    let stream = ictx
        .streams()
        .best(ffmpeg_next::media::Type::Video)
        .ok_or("No video stream found")?;

    let stream_index = stream.index();
    let time_base = stream.time_base();
    let rate = stream.rate();
    let fps = if rate.denominator() != 0 {
        rate.numerator() as f64 / rate.denominator() as f64
    } else {
        0.0
    };

    let codec_ctx = ffmpeg_next::codec::context::Context::from_parameters(stream.parameters())?;
    let decoder = codec_ctx.decoder().video()?;
    let width = decoder.width();
    let height = decoder.height();

    let scaler = ffmpeg_next::software::scaling::Context::get(
        decoder.format(),
        width,
        height,
        ffmpeg_next::format::Pixel::RGB24,
        width,
        height,
        ffmpeg_next::software::scaling::Flags::BILINEAR,
    )?;

    Ok(Decoding {
        ictx,
        decoder,
        scaler,
        width,
        height,
        stream_index,
        fps,
        time_base,
        frame_index: 0,
        flushing: false,
        done: false,
    })
}

impl Decoding {
    fn try_receive(&mut self) -> Option<Result<Frame, FrameSourceError>> {
        let mut decoded = ffmpeg_next::util::frame::video::Video::empty();
        if self.decoder.receive_frame(&mut decoded).is_err() {
            return None;
        }

        let index = self.frame_index;
        let mut rgb_frame = ffmpeg_next::util::frame::video::Video::empty();
        if let Err(e) = self.scaler.run(&decoded, &mut rgb_frame) {
            return Some(Err(FrameSourceError::Decode {
                index,
                reason: e.to_string(),
            }));
        }

        let pixels = extract_rgb_pixels(&rgb_frame, self.width, self.height);
        let timestamp_ms = match decoded.pts() {
            Some(pts) if self.time_base.denominator() != 0 => {
                pts as f64 * self.time_base.numerator() as f64 / self.time_base.denominator() as f64
                    * 1000.0
            }
            _ if self.fps > 0.0 => index as f64 / self.fps * 1000.0,
            _ => 0.0,
        };
        self.frame_index += 1;
        Some(Ok(
            Frame::new(pixels, self.width, self.height, 3, index).with_timestamp(timestamp_ms)
        ))
    }

    fn next(&mut self) -> Option<Result<Frame, FrameSourceError>> {
        if self.done {
            return None;
        }

        if let Some(result) = self.try_receive() {
            return Some(result);
        }

        if self.flushing {
            self.done = true;
            return None;
        }

        loop {
            let Some((stream, packet)) = self.ictx.packets().next() else {
                let _ = self.decoder.send_eof();
                self.flushing = true;
                if let Some(result) = self.try_receive() {
                    return Some(result);
                }
                self.done = true;
                return None;
            };

            if stream.index() != self.stream_index {
                continue;
            }

            if self.decoder.send_packet(&packet).is_err() {
                continue;
            }

            if let Some(result) = self.try_receive() {
                return Some(result);
            }
        }
    }
}

impl FrameSource for VideoFileSource {
    fn next_frame(&mut self) -> Result<Option<Frame>, FrameSourceError> {
        if self.control.is_paused() {
            return Ok(None);
        }
        let decoding = self
            .decoding
            .as_mut()
            .ok_or(FrameSourceError::NotOpened)?;
        let fps = decoding.fps;
        match decoding.next() {
            Some(Ok(frame)) => {
                self.pace(frame.index(), fps);
                Ok(Some(frame))
            }
            Some(Err(e)) => Err(e),
            None => Ok(None),
        }
    }

    fn release(&mut self) {
        self.decoding = None;
        self.started = None;
    }

    fn describe(&self) -> String {
        format!("video file {}", self.path.display())
    }
}

/// Copies pixel data from an ffmpeg frame into a contiguous RGB buffer,
/// dropping per-row stride padding.
fn extract_rgb_pixels(
    rgb_frame: &ffmpeg_next::util::frame::video::Video,
    width: u32,
    height: u32,
) -> Vec<u8> {
    let stride = rgb_frame.stride(0);
    let data = rgb_frame.data(0);
    let w = width as usize;
    let h = height as usize;

    let mut pixels = Vec::with_capacity(w * h * 3);
    for row in 0..h {
        let row_start = row * stride;
        pixels.extend_from_slice(&data[row_start..row_start + w * 3]);
    }
    pixels
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Encodes `num_frames` solid gray frames as MPEG-4.
    fn create_test_video(path: &Path, num_frames: usize, width: u32, height: u32, fps: i32) {
        ffmpeg_next::init().unwrap();

        let mut octx = ffmpeg_next::format::output(path).unwrap();
        let global_header = octx
            .format()
            .flags()
            .contains(ffmpeg_next::format::Flags::GLOBAL_HEADER);

        let codec = ffmpeg_next::encoder::find(ffmpeg_next::codec::Id::MPEG4).unwrap();
        let mut ost = octx.add_stream(Some(codec)).unwrap();

        let mut encoder_ctx = ffmpeg_next::codec::context::Context::new_with_codec(codec)
            .encoder()
            .video()
            .unwrap();
        encoder_ctx.set_width(width);
        encoder_ctx.set_height(height);
        encoder_ctx.set_format(ffmpeg_next::format::Pixel::YUV420P);
        encoder_ctx.set_time_base(ffmpeg_next::Rational(1, fps));
        encoder_ctx.set_frame_rate(Some(ffmpeg_next::Rational(fps, 1)));
        if global_header {
            encoder_ctx.set_flags(ffmpeg_next::codec::Flags::GLOBAL_HEADER);
        }

        let mut encoder = encoder_ctx
            .open_with(ffmpeg_next::Dictionary::new())
            .unwrap();
        ost.set_parameters(&encoder);
        octx.write_header().unwrap();
        let ost_time_base = octx.stream(0).unwrap().time_base();

        let mut scaler = ffmpeg_next::software::scaling::Context::get(
            ffmpeg_next::format::Pixel::RGB24,
            width,
            height,
            ffmpeg_next::format::Pixel::YUV420P,
            width,
            height,
            ffmpeg_next::software::scaling::Flags::BILINEAR,
        )
        .unwrap();

        for i in 0..num_frames {
            let mut rgb_frame = ffmpeg_next::util::frame::video::Video::new(
                ffmpeg_next::format::Pixel::RGB24,
                width,
                height,
            );
            let stride = rgb_frame.stride(0);
            let data = rgb_frame.data_mut(0);
            let value = ((i * 40) % 256) as u8;
            for row in 0..height as usize {
                for col in 0..width as usize {
                    let offset = row * stride + col * 3;
                    data[offset..offset + 3].fill(value);
                }
            }

            let mut yuv_frame = ffmpeg_next::util::frame::video::Video::empty();
            scaler.run(&rgb_frame, &mut yuv_frame).unwrap();
            yuv_frame.set_pts(Some(i as i64));
            encoder.send_frame(&yuv_frame).unwrap();

            let mut encoded = ffmpeg_next::Packet::empty();
            while encoder.receive_packet(&mut encoded).is_ok() {
                encoded.set_stream(0);
                encoded.rescale_ts(ffmpeg_next::Rational(1, fps), ost_time_base);
                encoded.write_interleaved(&mut octx).unwrap();
            }
        }

        encoder.send_eof().unwrap();
        let mut encoded = ffmpeg_next::Packet::empty();
        while encoder.receive_packet(&mut encoded).is_ok() {
            encoded.set_stream(0);
            encoded.rescale_ts(ffmpeg_next::Rational(1, fps), ost_time_base);
            encoded.write_interleaved(&mut octx).unwrap();
        }
        octx.write_trailer().unwrap();
    }

    #[test]
    fn test_decodes_every_frame_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("clip.mp4");
        create_test_video(&path, 5, 160, 120, 30);

        let mut source = VideoFileSource::open(&path, PlaybackControl::new()).unwrap();
        assert_eq!(source.dimensions(), Some((160, 120)));

        let mut indices = Vec::new();
        while let Some(frame) = source.next_frame().unwrap() {
            assert_eq!(frame.width(), 160);
            assert_eq!(frame.data().len(), 160 * 120 * 3);
            assert!(frame.timestamp_ms().is_some());
            indices.push(frame.index());
        }
        assert_eq!(indices, vec![0, 1, 2, 3, 4]);
        assert!(source.next_frame().unwrap().is_none());
    }

    #[test]
    fn test_paused_playback_reports_end_of_stream() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("clip.mp4");
        create_test_video(&path, 3, 64, 48, 30);

        let control = PlaybackControl::new();
        let mut source = VideoFileSource::open(&path, control.clone()).unwrap();
        control.pause();
        assert!(source.next_frame().unwrap().is_none());
        control.resume();
        assert_eq!(source.next_frame().unwrap().unwrap().index(), 0);
    }

    #[test]
    fn test_released_source_is_not_opened() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("clip.mp4");
        create_test_video(&path, 2, 64, 48, 30);

        let mut source = VideoFileSource::open(&path, PlaybackControl::new()).unwrap();
        source.release();
        assert!(matches!(
            source.next_frame(),
            Err(FrameSourceError::NotOpened)
        ));
    }

    #[test]
    fn test_open_nonexistent_is_open_error() {
        let result = VideoFileSource::open("/nonexistent/clip.mp4", PlaybackControl::new());
        assert!(matches!(result, Err(FrameSourceError::Open { .. })));
    }
}
