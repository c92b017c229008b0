//! Local video file source using FFmpeg.
//!
//! Frames are decoded in-memory and converted to packed RGB24. Packets the
//! decoder rejects surface as undecodable frames; the end of the container
//! drains the decoder and then reports end-of-stream.

use anyhow::{anyhow, Context, Result};
use ffmpeg_next as ffmpeg;

use super::FrameRead;
use crate::frame::Frame;

pub(crate) struct FfmpegFileSource {
    path: String,
    state: Option<OpenVideo>,
}

struct OpenVideo {
    input: ffmpeg::format::context::Input,
    stream_index: usize,
    decoder: ffmpeg::codec::decoder::Video,
    scaler: ffmpeg::software::scaling::Context,
    next_index: u64,
    draining: bool,
}

impl FfmpegFileSource {
    pub(crate) fn new(path: String) -> Self {
        Self { path, state: None }
    }

    pub(crate) fn describe(&self) -> String {
        self.path.clone()
    }

    pub(crate) fn open(&mut self) -> Result<()> {
        ffmpeg::init().context("initialize ffmpeg")?;
        let input = ffmpeg::format::input(&self.path)
            .with_context(|| format!("failed to open video '{}' with ffmpeg", self.path))?;
        let input_stream = input
            .streams()
            .best(ffmpeg::media::Type::Video)
            .ok_or_else(|| anyhow!("{} has no video track", self.path))?;
        let stream_index = input_stream.index();
        let context = ffmpeg::codec::context::Context::from_parameters(input_stream.parameters())
            .context("load video decoder parameters")?;
        let decoder = context
            .decoder()
            .video()
            .context("open ffmpeg video decoder")?;

        let scaler = ffmpeg::software::scaling::context::Context::get(
            decoder.format(),
            decoder.width(),
            decoder.height(),
            ffmpeg::util::format::pixel::Pixel::RGB24,
            decoder.width(),
            decoder.height(),
            ffmpeg::software::scaling::flag::Flags::BILINEAR,
        )
        .context("create ffmpeg scaler")?;

        self.state = Some(OpenVideo {
            input,
            stream_index,
            decoder,
            scaler,
            next_index: 0,
            draining: false,
        });
        log::debug!("FileSource: opened {} (ffmpeg)", self.path);
        Ok(())
    }

    pub(crate) fn read(&mut self) -> Result<FrameRead> {
        let state = self
            .state
            .as_mut()
            .ok_or_else(|| anyhow!("video {} is not open", self.path))?;
        let mut decoded = ffmpeg::frame::Video::empty();
        loop {
            if state.decoder.receive_frame(&mut decoded).is_ok() {
                let index = state.next_index;
                state.next_index += 1;
                let mut rgb_frame = ffmpeg::frame::Video::empty();
                if let Err(err) = state.scaler.run(&decoded, &mut rgb_frame) {
                    log::debug!("{}: cannot scale frame {}: {}", self.path, index, err);
                    return Ok(FrameRead::Undecodable);
                }
                let (pixels, width, height) = frame_to_pixels(&rgb_frame)?;
                return Ok(FrameRead::Frame(Frame::from_rgb(
                    pixels, width, height, index,
                )?));
            }
            if state.draining {
                return Ok(FrameRead::EndOfStream);
            }
            let next_packet = state.input.packets().next();
            match next_packet {
                Some((stream, packet)) => {
                    if stream.index() != state.stream_index {
                        continue;
                    }
                    if let Err(err) = state.decoder.send_packet(&packet) {
                        let index = state.next_index;
                        state.next_index += 1;
                        log::debug!("{}: cannot decode packet {}: {}", self.path, index, err);
                        return Ok(FrameRead::Undecodable);
                    }
                }
                None => {
                    state.decoder.send_eof().context("flush ffmpeg decoder")?;
                    state.draining = true;
                }
            }
        }
    }

    pub(crate) fn close(&mut self) {
        self.state = None;
    }

    pub(crate) fn is_open(&self) -> bool {
        self.state.is_some()
    }
}

fn frame_to_pixels(frame: &ffmpeg::frame::Video) -> Result<(Vec<u8>, u32, u32)> {
    let width = frame.width();
    let height = frame.height();
    let row_bytes = (width as usize) * 3;
    let stride = frame.stride(0);
    let data = frame.data(0);

    if stride == row_bytes {
        let len = row_bytes * height as usize;
        let pixels = data
            .get(..len)
            .context("ffmpeg frame is shorter than its dimensions")?;
        return Ok((pixels.to_vec(), width, height));
    }

    let mut pixels = Vec::with_capacity(row_bytes * height as usize);
    for row in 0..height as usize {
        let start = row * stride;
        let end = start + row_bytes;
        pixels.extend_from_slice(
            data.get(start..end)
                .context("ffmpeg frame row is out of bounds")?,
        );
    }

    Ok((pixels, width, height))
}
