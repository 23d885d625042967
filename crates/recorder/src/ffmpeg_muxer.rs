//! MP4 (or any container ffmpeg can guess from the file name) through
//! libavformat.

use std::ffi::CString;
use std::path::{Path, PathBuf};
use std::ptr;

use common::ffmpeg_next as ffmpeg;
use common::log::{debug, info};
use common::sys;
use common::{PacketFlags, TrackFormat, VideoCodec};

use crate::writer::{ContainerFactory, ContainerWriter, TrackId, WriterError};

const MICROS: sys::AVRational = sys::AVRational {
    num: 1,
    den: 1_000_000,
};

fn av_error(call: &str, ret: i32) -> WriterError {
    WriterError::Muxer(format!("{call}: {}", ffmpeg::Error::from(ret)))
}

pub struct FfmpegMuxer {
    path: PathBuf,
    ctx: *mut sys::AVFormatContext,
    stream: *mut sys::AVStream,
    frame_duration_usec: i64,
    first_pts: Option<i64>,
    header_written: bool,
    io_open: bool,
    samples: u64,
}

// The context is only touched through `&mut self`.
unsafe impl Send for FfmpegMuxer {}

impl FfmpegMuxer {
    pub fn create(path: &Path) -> Result<Self, WriterError> {
        ffmpeg::init().map_err(|e| WriterError::Muxer(e.to_string()))?;
        let c_path = CString::new(path.to_string_lossy().as_bytes())
            .map_err(|_| WriterError::Muxer(format!("invalid path {}", path.display())))?;

        let mut ctx: *mut sys::AVFormatContext = ptr::null_mut();
        let ret = unsafe {
            sys::avformat_alloc_output_context2(
                &mut ctx,
                ptr::null_mut(),
                ptr::null(),
                c_path.as_ptr(),
            )
        };
        if ret < 0 || ctx.is_null() {
            return Err(av_error("avformat_alloc_output_context2", ret));
        }

        let mut muxer = Self {
            path: path.to_path_buf(),
            ctx,
            stream: ptr::null_mut(),
            frame_duration_usec: 0,
            first_pts: None,
            header_written: false,
            io_open: false,
            samples: 0,
        };

        unsafe {
            if (*(*ctx).oformat).flags & sys::AVFMT_NOFILE == 0 {
                let ret = sys::avio_open(&mut (*ctx).pb, c_path.as_ptr(), sys::AVIO_FLAG_WRITE);
                if ret < 0 {
                    // `muxer` frees the context on drop.
                    return Err(av_error("avio_open", ret));
                }
                muxer.io_open = true;
            }
        }
        debug!("[ffmpeg] opened {}", path.display());
        Ok(muxer)
    }

    fn codec_id(codec: VideoCodec) -> sys::AVCodecID {
        match codec {
            VideoCodec::H264 => sys::AVCodecID::AV_CODEC_ID_H264,
            VideoCodec::H265 => sys::AVCodecID::AV_CODEC_ID_HEVC,
        }
    }
}

impl ContainerWriter for FfmpegMuxer {
    fn add_track(&mut self, format: &TrackFormat) -> Result<TrackId, WriterError> {
        if !self.stream.is_null() {
            return Err(WriterError::State("muxer holds a single video track"));
        }
        if self.header_written {
            return Err(WriterError::State("add_track after start"));
        }
        unsafe {
            let stream = sys::avformat_new_stream(self.ctx, ptr::null());
            if stream.is_null() {
                return Err(WriterError::Muxer("avformat_new_stream failed".into()));
            }
            let par = (*stream).codecpar;
            (*par).codec_type = sys::AVMediaType::AVMEDIA_TYPE_VIDEO;
            (*par).codec_id = Self::codec_id(format.codec);
            (*par).width = format.width as i32;
            (*par).height = format.height as i32;
            (*par).bit_rate = format.bit_rate as i64;

            if !format.codec_config.is_empty() {
                let size = format.codec_config.len();
                let extradata =
                    sys::av_mallocz(size + sys::AV_INPUT_BUFFER_PADDING_SIZE as usize) as *mut u8;
                if extradata.is_null() {
                    return Err(WriterError::Muxer("out of memory for extradata".into()));
                }
                ptr::copy_nonoverlapping(format.codec_config.as_ptr(), extradata, size);
                (*par).extradata = extradata;
                (*par).extradata_size = size as i32;
            }

            (*stream).time_base = MICROS;
            self.stream = stream;
        }
        self.frame_duration_usec = 1_000_000 / format.frame_rate.max(1) as i64;
        Ok(TrackId(0))
    }

    fn start(&mut self) -> Result<(), WriterError> {
        if self.stream.is_null() {
            return Err(WriterError::State("start without a track"));
        }
        let ret = unsafe { sys::avformat_write_header(self.ctx, ptr::null_mut()) };
        if ret < 0 {
            return Err(av_error("avformat_write_header", ret));
        }
        self.header_written = true;
        Ok(())
    }

    fn write_sample(
        &mut self,
        track: TrackId,
        data: &[u8],
        flags: PacketFlags,
        pts_usec: i64,
    ) -> Result<(), WriterError> {
        if !self.header_written {
            return Err(WriterError::State("write_sample before start"));
        }
        if track != TrackId(0) {
            return Err(WriterError::UnknownTrack(track.0));
        }

        // Every file starts at zero.
        let base = *self.first_pts.get_or_insert(pts_usec);
        let pts = pts_usec - base;
        unsafe {
            // The muxer may have replaced the time base in write_header.
            let time_base = (*self.stream).time_base;
            let mut packet = sys::AVPacket {
                data: data.as_ptr() as *mut u8,
                size: data.len() as i32,
                pts: sys::av_rescale_q(pts, MICROS, time_base),
                dts: sys::av_rescale_q(pts, MICROS, time_base),
                duration: sys::av_rescale_q(self.frame_duration_usec, MICROS, time_base),
                stream_index: (*self.stream).index,
                flags: if flags.is_key_frame() {
                    sys::AV_PKT_FLAG_KEY
                } else {
                    0
                },
                pos: -1,
                ..std::mem::zeroed()
            };
            let ret = sys::av_interleaved_write_frame(self.ctx, &mut packet);
            if ret < 0 {
                return Err(av_error("av_interleaved_write_frame", ret));
            }
        }
        self.samples += 1;
        Ok(())
    }

    fn stop(&mut self) -> Result<(), WriterError> {
        let mut result = Ok(());
        if self.header_written {
            self.header_written = false;
            let ret = unsafe { sys::av_write_trailer(self.ctx) };
            if ret < 0 {
                result = Err(av_error("av_write_trailer", ret));
            } else {
                info!("[ffmpeg] {}: {} samples", self.path.display(), self.samples);
            }
        }
        if self.io_open {
            self.io_open = false;
            unsafe { sys::avio_closep(&mut (*self.ctx).pb) };
        }
        result
    }

    fn release(&mut self) {
        if self.ctx.is_null() {
            return;
        }
        if self.io_open {
            self.io_open = false;
            unsafe { sys::avio_closep(&mut (*self.ctx).pb) };
        }
        unsafe { sys::avformat_free_context(self.ctx) };
        self.ctx = ptr::null_mut();
        self.stream = ptr::null_mut();
    }
}

impl Drop for FfmpegMuxer {
    fn drop(&mut self) {
        self.release();
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct FfmpegMuxerFactory;

impl ContainerFactory for FfmpegMuxerFactory {
    fn open(&self, path: &Path) -> Result<Box<dyn ContainerWriter>, WriterError> {
        Ok(Box::new(FfmpegMuxer::create(path)?))
    }

    fn extension(&self, _codec: VideoCodec) -> &'static str {
        "mp4"
    }
}
