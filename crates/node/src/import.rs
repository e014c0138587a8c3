//! External block file import (`--load-block` and `bootstrap.dat`).
//!
//! Files carry framed raw blocks: a magic marker, a length, then the
//! block bytes. The reader is tolerant of trailing garbage, mirroring
//! how partially downloaded bootstrap files end.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use onyx_chainstate::encoding::Decoder;

pub const BOOTSTRAP_FILE_NAME: &str = "bootstrap.dat";
const BLOCK_FILE_MAGIC: u32 = 0x5859_4e4f;
const MAX_BLOCK_BYTES: u32 = 8 * 1024 * 1024;

/// Seam to the external validation pipeline.
pub trait BlockImportSink {
    fn import_block(&mut self, raw: &[u8]) -> Result<(), String>;
}

/// Import one framed block file. Returns the number of blocks handed to
/// the sink; unreadable framing stops the scan without failing blocks
/// already imported.
pub fn import_block_file(
    path: &Path,
    sink: &mut dyn BlockImportSink,
    interrupt: &AtomicBool,
) -> Result<usize, String> {
    let bytes =
        fs::read(path).map_err(|err| format!("cannot read {}: {err}", path.display()))?;

    let mut imported = 0usize;
    let mut decoder = Decoder::new(&bytes);
    while !decoder.is_empty() {
        if interrupt.load(Ordering::SeqCst) {
            break;
        }
        let Ok(magic) = decoder.read_u32_le() else {
            break;
        };
        if magic != BLOCK_FILE_MAGIC {
            break;
        }
        let Ok(length) = decoder.read_u32_le() else {
            break;
        };
        if length == 0 || length > MAX_BLOCK_BYTES {
            break;
        }
        let Ok(raw) = decoder.read_bytes(length as usize) else {
            break;
        };
        sink.import_block(&raw)?;
        imported += 1;
    }
    Ok(imported)
}

/// Import `<data_dir>/bootstrap.dat` if present, then rename it to
/// `bootstrap.dat.old` so the import never repeats. `None` when the
/// file does not exist.
pub fn import_bootstrap_file(
    data_dir: &Path,
    sink: &mut dyn BlockImportSink,
    interrupt: &AtomicBool,
) -> Result<Option<usize>, String> {
    let path = data_dir.join(BOOTSTRAP_FILE_NAME);
    if !path.exists() {
        return Ok(None);
    }
    onyx_log::log_info!("importing blocks from {}", path.display());
    let imported = import_block_file(&path, sink, interrupt)?;
    let spent = path.with_extension("dat.old");
    fs::rename(&path, &spent)
        .map_err(|err| format!("cannot rename {}: {err}", path.display()))?;
    Ok(Some(imported))
}

/// Frame blocks the way `import_block_file` reads them.
pub fn encode_block_frames(blocks: &[Vec<u8>]) -> Vec<u8> {
    let mut out = Vec::new();
    for raw in blocks {
        out.extend_from_slice(&BLOCK_FILE_MAGIC.to_le_bytes());
        out.extend_from_slice(&(raw.len() as u32).to_le_bytes());
        out.extend_from_slice(raw);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct CountingSink {
        blocks: Vec<Vec<u8>>,
    }

    impl BlockImportSink for CountingSink {
        fn import_block(&mut self, raw: &[u8]) -> Result<(), String> {
            self.blocks.push(raw.to_vec());
            Ok(())
        }
    }

    #[test]
    fn framed_blocks_reach_the_sink() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("blocks.dat");
        let blocks = vec![vec![1u8; 10], vec![2u8; 20]];
        fs::write(&path, encode_block_frames(&blocks)).expect("write");

        let mut sink = CountingSink::default();
        let imported =
            import_block_file(&path, &mut sink, &AtomicBool::new(false)).expect("import");
        assert_eq!(imported, 2);
        assert_eq!(sink.blocks, blocks);
    }

    #[test]
    fn trailing_garbage_stops_quietly() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("blocks.dat");
        let mut bytes = encode_block_frames(&[vec![1u8; 10]]);
        bytes.extend_from_slice(b"partial download tail");
        fs::write(&path, &bytes).expect("write");

        let mut sink = CountingSink::default();
        let imported =
            import_block_file(&path, &mut sink, &AtomicBool::new(false)).expect("import");
        assert_eq!(imported, 1);
    }

    #[test]
    fn bootstrap_file_is_renamed_after_import() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join(BOOTSTRAP_FILE_NAME);
        fs::write(&path, encode_block_frames(&[vec![3u8; 5]])).expect("write");

        let mut sink = CountingSink::default();
        let imported = import_bootstrap_file(dir.path(), &mut sink, &AtomicBool::new(false))
            .expect("import");
        assert_eq!(imported, Some(1));
        assert!(!path.exists());
        assert!(dir.path().join("bootstrap.dat.old").exists());
    }

    #[test]
    fn absent_bootstrap_file_is_skipped() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut sink = CountingSink::default();
        let imported = import_bootstrap_file(dir.path(), &mut sink, &AtomicBool::new(false))
            .expect("import");
        assert_eq!(imported, None);
    }

    #[test]
    fn interrupt_stops_the_scan() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("blocks.dat");
        fs::write(&path, encode_block_frames(&[vec![1u8; 4], vec![2u8; 4]])).expect("write");

        let mut sink = CountingSink::default();
        let interrupt = AtomicBool::new(true);
        let imported = import_block_file(&path, &mut sink, &interrupt).expect("import");
        assert_eq!(imported, 0);
    }
}
