//! Fixtures shared by the unit tests: an in-memory filesystem, a manual
//! executor, a fake transcoder, and builders for every replacement format.

use std::collections::HashMap;
use std::io::{self, Cursor, Write};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};

use flate2::write::ZlibEncoder;
use flate2::Compression;
use image::{ImageBuffer, ImageFormat, Rgb, RgbImage, Rgba, RgbaImage};
use texreplace_formats::dds::{
    DdsHeader, DdsHeaderDx10, DdsPixelFormat, DDPF_FOURCC, DDS_MAGIC,
};
use texreplace_formats::ktx2::{
    Ktx2File, Ktx2Header, Ktx2LevelIndex, KHR_DF_MODEL_ETC1S, KHR_DF_MODEL_UASTC,
    KTX2_IDENTIFIER, SUPERCOMPRESSION_BASIS_LZ,
};
use texreplace_formats::zim::{ZimHeader, ZIM_MAGIC, ZIM_ZLIB_COMPRESSED};
use texreplace_formats::{BasisPayload, BasisTranscoder, TranscodeTarget};

use crate::task::{Task, TaskExecutor};
use crate::vfs::{FileReference, OpenFile, VfsBackend};

/// Blocks callers until opened.
#[derive(Debug, Default)]
pub struct Gate {
    open: Mutex<bool>,
    cond: Condvar,
}

impl Gate {
    pub fn open(&self) {
        *self.open.lock().unwrap() = true;
        self.cond.notify_all();
    }

    pub fn wait(&self) {
        let open = self.open.lock().unwrap();
        let _open = self.cond.wait_while(open, |open| !*open).unwrap();
    }
}

/// Filesystem held in memory that counts what it hands out.
#[derive(Debug, Default)]
pub struct MemoryVfs {
    files: Mutex<HashMap<String, Vec<u8>>>,
    lookups: Mutex<Vec<String>>,
    refs_handed: AtomicUsize,
    refs_released: AtomicUsize,
    opens: AtomicUsize,
    open_gate: Option<Arc<Gate>>,
}

impl MemoryVfs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every open blocks until `gate` is opened.
    pub fn with_gate(gate: Arc<Gate>) -> Self {
        Self {
            open_gate: Some(gate),
            ..Self::default()
        }
    }

    pub fn insert(&self, name: &str, data: Vec<u8>) {
        self.files.lock().unwrap().insert(name.to_string(), data);
    }

    pub fn lookups(&self) -> Vec<String> {
        self.lookups.lock().unwrap().clone()
    }

    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    /// References handed out and not yet released.
    pub fn outstanding_refs(&self) -> usize {
        self.refs_handed.load(Ordering::SeqCst) - self.refs_released.load(Ordering::SeqCst)
    }
}

impl VfsBackend for MemoryVfs {
    fn get_file(&self, name: &str) -> Option<FileReference> {
        self.lookups.lock().unwrap().push(name.to_string());
        if !self.files.lock().unwrap().contains_key(name) {
            return None;
        }
        self.refs_handed.fetch_add(1, Ordering::SeqCst);
        Some(FileReference::new(name, 0))
    }

    fn open_file_for_read(&self, file: &FileReference) -> io::Result<OpenFile> {
        if let Some(gate) = &self.open_gate {
            gate.wait();
        }
        self.opens.fetch_add(1, Ordering::SeqCst);
        let data = self
            .files
            .lock()
            .unwrap()
            .get(file.name())
            .cloned()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, file.name().to_string()))?;
        Ok(OpenFile::from_bytes(data))
    }

    fn release_file(&self, file: FileReference) {
        drop(file);
        self.refs_released.fetch_add(1, Ordering::SeqCst);
    }

    fn describe(&self) -> String {
        "memory".to_string()
    }
}

/// Executor that queues tasks until the test runs them.
#[derive(Default)]
pub struct ManualExecutor {
    queue: Mutex<Vec<Task>>,
    submitted: AtomicUsize,
}

impl ManualExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn submitted(&self) -> usize {
        self.submitted.load(Ordering::SeqCst)
    }

    /// Run every queued task on the calling thread.
    pub fn run_all(&self) {
        let tasks: Vec<Task> = std::mem::take(&mut *self.queue.lock().unwrap());
        for task in tasks {
            task();
        }
    }
}

impl TaskExecutor for ManualExecutor {
    fn submit(&self, task: Task) {
        self.submitted.fetch_add(1, Ordering::SeqCst);
        self.queue.lock().unwrap().push(task);
    }
}

/// Transcoder that fills each level with `level + 1`.
#[derive(Debug, Default)]
pub struct FakeTranscoder {
    pub calls: Mutex<Vec<(u32, TranscodeTarget)>>,
}

impl BasisTranscoder for FakeTranscoder {
    fn transcode_level(
        &self,
        _file: &Ktx2File<'_>,
        level: u32,
        target: TranscodeTarget,
        out: &mut [u8],
        _row_pitch: u32,
    ) -> texreplace_formats::Result<()> {
        self.calls.lock().unwrap().push((level, target));
        out.fill(level as u8 + 1);
        Ok(())
    }
}

/// Transcoder whose first call panics.
#[derive(Debug, Default)]
pub struct PanickingTranscoder;

impl BasisTranscoder for PanickingTranscoder {
    fn transcode_level(
        &self,
        _file: &Ktx2File<'_>,
        level: u32,
        _target: TranscodeTarget,
        _out: &mut [u8],
        _row_pitch: u32,
    ) -> texreplace_formats::Result<()> {
        panic!("transcoder blew up on level {}", level);
    }
}

/// RGBA PNG filled with one colour.
pub fn png_rgba(width: u32, height: u32, alpha: u8) -> Vec<u8> {
    let img: RgbaImage = ImageBuffer::from_pixel(width, height, Rgba([10u8, 20, 30, alpha]));
    let mut out = Cursor::new(Vec::new());
    img.write_to(&mut out, ImageFormat::Png).unwrap();
    out.into_inner()
}

/// RGB PNG, which has no alpha channel at all.
pub fn png_rgb(width: u32, height: u32) -> Vec<u8> {
    let img: RgbImage = ImageBuffer::from_pixel(width, height, Rgb([10u8, 20, 30]));
    let mut out = Cursor::new(Vec::new());
    img.write_to(&mut out, ImageFormat::Png).unwrap();
    out.into_inner()
}

fn zim_header(width: u32, height: u32, flags: u32) -> ZimHeader {
    ZimHeader {
        magic: ZIM_MAGIC,
        width,
        height,
        flags,
    }
}

/// Uncompressed RGBA8888 ZIM.
pub fn zim_raw(width: u32, height: u32, pixel: [u8; 4]) -> Vec<u8> {
    let mut out = bytemuck::bytes_of(&zim_header(width, height, 0)).to_vec();
    for _ in 0..width * height {
        out.extend_from_slice(&pixel);
    }
    out
}

/// A bare ZIM header with no payload behind it.
pub fn zim_header_only(width: u32, height: u32) -> Vec<u8> {
    bytemuck::bytes_of(&zim_header(width, height, 0)).to_vec()
}

/// Zlib-compressed RGBA8888 ZIM.
pub fn zim_zlib(width: u32, height: u32, pixel: [u8; 4]) -> Vec<u8> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    for _ in 0..width * height {
        encoder.write_all(&pixel).unwrap();
    }
    let payload = encoder.finish().unwrap();
    let mut out = bytemuck::bytes_of(&zim_header(width, height, ZIM_ZLIB_COMPRESSED)).to_vec();
    out.extend_from_slice(&payload);
    out
}

fn dds_header(four_cc: u32, width: u32, height: u32, mips: u32) -> DdsHeader {
    DdsHeader {
        magic: DDS_MAGIC,
        size: 124,
        flags: 0x1 | 0x2 | 0x4 | 0x1000 | 0x20000,
        height,
        width,
        pitch_or_linear_size: 0,
        depth: 0,
        mip_map_count: mips,
        reserved1: [0; 11],
        pixel_format: DdsPixelFormat {
            size: 32,
            flags: DDPF_FOURCC,
            four_cc,
            ..DdsPixelFormat::default()
        },
        caps: 0x1000,
        caps2: 0,
        caps3: 0,
        caps4: 0,
        reserved2: 0,
    }
}

/// DDS with a legacy FOURCC and `payload_len` bytes of level data.
pub fn dds_fourcc(
    four_cc: &[u8; 4],
    width: u32,
    height: u32,
    mips: u32,
    payload_len: usize,
) -> Vec<u8> {
    let header = dds_header(u32::from_le_bytes(*four_cc), width, height, mips);
    let mut out = bytemuck::bytes_of(&header).to_vec();
    out.extend((0..payload_len).map(|i| (i % 256) as u8));
    out
}

/// DDS with a DX10 extension header.
pub fn dds_dx10(
    dxgi_format: u32,
    width: u32,
    height: u32,
    mips: u32,
    payload_len: usize,
) -> Vec<u8> {
    let header = dds_header(u32::from_le_bytes(*b"DX10"), width, height, mips);
    let dx10 = DdsHeaderDx10 {
        dxgi_format,
        resource_dimension: 3,
        misc_flag: 0,
        array_size: 1,
        misc_flags2: 0,
    };
    let mut out = bytemuck::bytes_of(&header).to_vec();
    out.extend_from_slice(bytemuck::bytes_of(&dx10));
    out.extend((0..payload_len).map(|i| (i % 256) as u8));
    out
}

/// Minimal KTX2 file with a Basis payload and `levels` mip levels.
pub fn ktx2_file(width: u32, height: u32, levels: u32, payload: BasisPayload) -> Vec<u8> {
    let index_size = std::mem::size_of::<Ktx2LevelIndex>();
    let dfd_offset = (Ktx2Header::SIZE + levels as usize * index_size) as u32;
    let dfd_len = 44u32;
    let header = Ktx2Header {
        identifier: KTX2_IDENTIFIER,
        vk_format: 0,
        type_size: 1,
        pixel_width: width,
        pixel_height: height,
        pixel_depth: 0,
        layer_count: 0,
        face_count: 1,
        level_count: levels,
        supercompression_scheme: match payload {
            BasisPayload::Etc1s => SUPERCOMPRESSION_BASIS_LZ,
            BasisPayload::Uastc => 0,
        },
        dfd_byte_offset: dfd_offset,
        dfd_byte_length: dfd_len,
        kvd_byte_offset: 0,
        kvd_byte_length: 0,
        sgd_byte_offset: 0,
        sgd_byte_length: 0,
    };

    let mut dfd = vec![0u8; dfd_len as usize];
    dfd[..4].copy_from_slice(&dfd_len.to_le_bytes());
    dfd[12] = match payload {
        BasisPayload::Etc1s => KHR_DF_MODEL_ETC1S,
        BasisPayload::Uastc => KHR_DF_MODEL_UASTC,
    };

    let mut offset = dfd_offset as u64 + dfd_len as u64;
    let mut index = Vec::new();
    let mut data = Vec::new();
    for level in 0..levels {
        let len = 32u64;
        index.push(Ktx2LevelIndex {
            byte_offset: offset,
            byte_length: len,
            uncompressed_byte_length: 0,
        });
        data.extend(std::iter::repeat_n(level as u8, len as usize));
        offset += len;
    }

    let mut out = bytemuck::bytes_of(&header).to_vec();
    for entry in &index {
        out.extend_from_slice(bytemuck::bytes_of(entry));
    }
    out.extend_from_slice(&dfd);
    out.extend_from_slice(&data);
    out
}
