//! [`BasisTranscoder`] backed by libktx, bound at runtime.
//!
//! The shared library is looked up when the transcoder is created, so hosts
//! without libktx installed still build and run; their KTX2 replacements
//! just fail to load.

use std::ffi::{c_char, c_int, CStr, OsStr, OsString};
use std::ptr::NonNull;
use std::sync::{Mutex, PoisonError};

use libloading::Library;

use crate::error::{FormatError, Result};
use crate::ktx2::{BasisTranscoder, Ktx2File, TranscodeTarget};

type KtxErrorCode = c_int;

const KTX_SUCCESS: KtxErrorCode = 0;
const KTX_TEXTURE_CREATE_LOAD_IMAGE_DATA_BIT: u32 = 0x1;

/// `ktx_transcode_fmt_e` values.
const KTX_TTF_ETC1_RGB: c_int = 0;
const KTX_TTF_BC1_RGB: c_int = 2;
const KTX_TTF_BC7_RGBA: c_int = 6;
const KTX_TTF_ASTC_4X4_RGBA: c_int = 10;
const KTX_TTF_RGBA32: c_int = 13;

/// Opaque `ktxTexture2`.
#[repr(C)]
struct KtxTexture2 {
    _private: [u8; 0],
}

type CreateFromMemoryFn =
    unsafe extern "system" fn(*const u8, usize, u32, *mut *mut KtxTexture2) -> KtxErrorCode;
type DestroyFn = unsafe extern "system" fn(*mut KtxTexture2);
type TranscodeBasisFn = unsafe extern "system" fn(*mut KtxTexture2, c_int, u32) -> KtxErrorCode;
type GetImageOffsetFn =
    unsafe extern "system" fn(*mut KtxTexture2, u32, u32, u32, *mut usize) -> KtxErrorCode;
type GetDataFn = unsafe extern "system" fn(*mut KtxTexture2) -> *mut u8;
type GetDataSizeFn = unsafe extern "system" fn(*mut KtxTexture2) -> usize;
type ErrorStringFn = unsafe extern "system" fn(KtxErrorCode) -> *const c_char;

/// Entry points resolved from the library.
#[derive(Clone, Copy)]
struct KtxApi {
    create_from_memory: CreateFromMemoryFn,
    destroy: DestroyFn,
    transcode_basis: TranscodeBasisFn,
    get_image_offset: GetImageOffsetFn,
    get_data: GetDataFn,
    get_data_size: GetDataSizeFn,
    error_string: ErrorStringFn,
}

impl KtxApi {
    /// # Safety
    ///
    /// `library` must be libktx 4.x, whose exports have the signatures above.
    unsafe fn resolve(library: &Library) -> Result<Self> {
        // SAFETY: each type matches the libktx prototype of its symbol.
        unsafe {
            Ok(Self {
                create_from_memory: symbol(library, b"ktxTexture2_CreateFromMemory\0")?,
                destroy: symbol(library, b"ktxTexture2_Destroy\0")?,
                transcode_basis: symbol(library, b"ktxTexture2_TranscodeBasis\0")?,
                get_image_offset: symbol(library, b"ktxTexture2_GetImageOffset\0")?,
                get_data: symbol(library, b"ktxTexture_GetData\0")?,
                get_data_size: symbol(library, b"ktxTexture_GetDataSize\0")?,
                error_string: symbol(library, b"ktxErrorString\0")?,
            })
        }
    }

    fn check(&self, code: KtxErrorCode, what: &str) -> Result<()> {
        if code == KTX_SUCCESS {
            return Ok(());
        }
        // SAFETY: ktxErrorString returns a static string or null.
        let message = unsafe {
            let ptr = (self.error_string)(code);
            if ptr.is_null() {
                format!("error {}", code)
            } else {
                CStr::from_ptr(ptr).to_string_lossy().into_owned()
            }
        };
        Err(FormatError::Transcode(format!("libktx {}: {}", what, message)))
    }
}

/// # Safety
///
/// `T` must be the function pointer type of the exported symbol `name`.
unsafe fn symbol<T: Copy>(library: &Library, name: &[u8]) -> Result<T> {
    // SAFETY: upheld by the caller.
    unsafe { library.get::<T>(name) }
        .map(|symbol| *symbol)
        .map_err(|e| FormatError::Transcode(e.to_string()))
}

/// A loaded texture, destroyed on drop.
struct Texture<'a> {
    api: &'a KtxApi,
    ptr: NonNull<KtxTexture2>,
}

impl Texture<'_> {
    fn as_ptr(&self) -> *mut KtxTexture2 {
        self.ptr.as_ptr()
    }
}

impl Drop for Texture<'_> {
    fn drop(&mut self) {
        // SAFETY: the pointer came from ktxTexture2_CreateFromMemory and is
        // destroyed exactly once.
        unsafe { (self.api.destroy)(self.ptr.as_ptr()) }
    }
}

fn transcode_format(target: TranscodeTarget) -> c_int {
    match target {
        TranscodeTarget::Bc1 => KTX_TTF_BC1_RGB,
        TranscodeTarget::Etc1Rgb => KTX_TTF_ETC1_RGB,
        TranscodeTarget::Bc7Rgba => KTX_TTF_BC7_RGBA,
        TranscodeTarget::Astc4x4Rgba => KTX_TTF_ASTC_4X4_RGBA,
        TranscodeTarget::Rgba32 => KTX_TTF_RGBA32,
    }
}

/// Names tried by [`LibKtxTranscoder::load`], most specific last.
pub fn library_candidates() -> Vec<OsString> {
    let mut names = vec![libloading::library_filename("ktx")];
    if cfg!(target_os = "linux") {
        names.push("libktx.so.4".into());
    } else if cfg!(target_os = "macos") {
        names.push("libktx.4.dylib".into());
    }
    names
}

/// Transcodes ETC1S and UASTC payloads with libktx.
pub struct LibKtxTranscoder {
    api: KtxApi,
    // Keeps the entry points in `api` mapped.
    _library: Library,
    // libktx shares transcoder tables between textures.
    lock: Mutex<()>,
}

impl std::fmt::Debug for LibKtxTranscoder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LibKtxTranscoder").finish_non_exhaustive()
    }
}

impl LibKtxTranscoder {
    /// Load libktx from the platform's library search path.
    pub fn load() -> Result<Self> {
        let mut last_error = None;
        for name in library_candidates() {
            match Self::load_from(&name) {
                Ok(transcoder) => return Ok(transcoder),
                Err(e) => last_error = Some(e),
            }
        }
        Err(last_error.unwrap_or_else(|| FormatError::Transcode("libktx not found".to_string())))
    }

    /// Load libktx from an explicit file name or path.
    pub fn load_from(path: impl AsRef<OsStr>) -> Result<Self> {
        let path = path.as_ref();
        // SAFETY: libktx runs no initialisers with preconditions on load.
        let library = unsafe { Library::new(path) }.map_err(|e| {
            FormatError::Transcode(format!("cannot load {}: {}", path.to_string_lossy(), e))
        })?;
        // SAFETY: the exports of libktx 4.x match the declared signatures.
        let api = unsafe { KtxApi::resolve(&library) }?;
        log::info!("Loaded KTX2 transcoder from {}", path.to_string_lossy());
        Ok(Self {
            api,
            _library: library,
            lock: Mutex::new(()),
        })
    }

    fn create(&self, bytes: &[u8]) -> Result<Texture<'_>> {
        let mut raw = std::ptr::null_mut();
        // SAFETY: `bytes` outlives the call; libktx copies what it keeps.
        let code = unsafe {
            (self.api.create_from_memory)(
                bytes.as_ptr(),
                bytes.len(),
                KTX_TEXTURE_CREATE_LOAD_IMAGE_DATA_BIT,
                &mut raw,
            )
        };
        self.api.check(code, "create")?;
        let ptr = NonNull::new(raw)
            .ok_or_else(|| FormatError::Transcode("libktx returned no texture".to_string()))?;
        Ok(Texture {
            api: &self.api,
            ptr,
        })
    }
}

impl BasisTranscoder for LibKtxTranscoder {
    fn transcode_level(
        &self,
        file: &Ktx2File<'_>,
        level: u32,
        target: TranscodeTarget,
        out: &mut [u8],
        _row_pitch: u32,
    ) -> Result<()> {
        let mut found = None;
        self.transcode_levels(
            file,
            level.saturating_add(1),
            target,
            &mut |i: u32, bytes: Vec<u8>| {
                if i == level {
                    found = Some(bytes);
                }
            },
        )?;
        match found {
            Some(bytes) if bytes.len() == out.len() => {
                out.copy_from_slice(&bytes);
                Ok(())
            }
            _ => Err(FormatError::Transcode(format!("level {} not produced", level))),
        }
    }

    fn transcode_levels(
        &self,
        file: &Ktx2File<'_>,
        count: u32,
        target: TranscodeTarget,
        sink: &mut dyn FnMut(u32, Vec<u8>),
    ) -> Result<()> {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        let texture = self.create(file.file_bytes())?;

        if file.payload().is_some() {
            // SAFETY: `texture` is live for the whole call.
            let code = unsafe {
                (self.api.transcode_basis)(texture.as_ptr(), transcode_format(target), 0)
            };
            self.api.check(code, "transcode")?;
        }

        // SAFETY: the data pointer and size describe one allocation owned by
        // `texture`, which outlives `data`.
        let data = unsafe {
            let ptr = (self.api.get_data)(texture.as_ptr());
            let len = (self.api.get_data_size)(texture.as_ptr());
            if ptr.is_null() {
                return Err(FormatError::Transcode("libktx texture has no data".to_string()));
            }
            std::slice::from_raw_parts(ptr, len)
        };

        for level in 0..count {
            let Some(info) = file.level_info(level) else {
                break;
            };
            let (size, _) = info.output_layout(target);
            let mut offset = 0usize;
            // SAFETY: `texture` is live and `offset` is a valid out pointer.
            let code = unsafe {
                (self.api.get_image_offset)(texture.as_ptr(), level, 0, 0, &mut offset)
            };
            self.api.check(code, "image offset")?;
            let Some(bytes) = offset
                .checked_add(size)
                .and_then(|end| data.get(offset..end))
            else {
                return Err(FormatError::Transcode(format!(
                    "level {} ({} bytes at {}) lies outside the texture data",
                    level, size, offset
                )));
            };
            sink(level, bytes.to_vec());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_library_is_an_error() {
        let err = LibKtxTranscoder::load_from("/nonexistent/libktx-missing.so").unwrap_err();
        assert!(matches!(err, FormatError::Transcode(_)));
    }

    #[test]
    fn test_candidates_include_platform_name() {
        let names = library_candidates();
        assert_eq!(names[0], libloading::library_filename("ktx"));
    }

    #[test]
    fn test_transcode_formats() {
        assert_eq!(transcode_format(TranscodeTarget::Rgba32), KTX_TTF_RGBA32);
        assert_eq!(transcode_format(TranscodeTarget::Bc7Rgba), KTX_TTF_BC7_RGBA);
        assert_eq!(transcode_format(TranscodeTarget::Etc1Rgb), KTX_TTF_ETC1_RGB);
    }
}
