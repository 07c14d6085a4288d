pub mod chipseq;
pub mod genome;
pub mod single_cell;

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use flate2::read::MultiGzDecoder;

use crate::adapter::Batches;
use crate::error::GraphError;

pub use chipseq::{ChipSeqAdapter, ChipSeqOptions};
pub use genome::{AssemblySource, GenomeAdapter, GenomeOptions};
pub use single_cell::{SingleCellAdapter, SingleCellOptions};

/// Records per node or edge batch for sources without a natural grouping.
pub const RECORD_BATCH: usize = 10_000;

/// Opens a plain or gzip-compressed (`.gz`) input file.
pub fn open_input(path: &Path) -> Result<Box<dyn BufRead>, GraphError> {
    let file = File::open(path)
        .map_err(|err| GraphError::Filesystem(format!("open {}: {err}", path.display())))?;
    let gzipped = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("gz"));
    if gzipped {
        Ok(Box::new(BufReader::new(MultiGzDecoder::new(file))))
    } else {
        Ok(Box::new(BufReader::new(file)))
    }
}

/// Tab-separated reader; `#` lines are comments and quotes are literal text.
pub fn tsv_reader<R: std::io::Read>(reader: R, has_headers: bool) -> csv::Reader<R> {
    csv::ReaderBuilder::new()
        .delimiter(b'\t')
        .has_headers(has_headers)
        .comment(Some(b'#'))
        .quoting(false)
        .flexible(true)
        .from_reader(reader)
}

/// File name without directories and without `.gz` and one format extension.
pub fn source_stem(path: &Path) -> String {
    let name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    let name = name.strip_suffix(".gz").unwrap_or(&name);
    match name.rsplit_once('.') {
        Some((stem, _)) if !stem.is_empty() => stem.to_string(),
        _ => name.to_string(),
    }
}

/// Splits `items` into [`RECORD_BATCH`]-sized batches, building records
/// lazily. `build` returning `None` leaves the item out.
pub(crate) fn chunked<'a, S, T, F>(items: &'a [S], build: F) -> Batches<'a, T>
where
    S: 'a,
    T: 'a,
    F: Fn(&S) -> Result<Option<T>, GraphError> + 'a,
{
    Box::new(items.chunks(RECORD_BATCH).map(move |chunk| {
        let mut batch = Vec::with_capacity(chunk.len());
        for item in chunk {
            if let Some(record) = build(item)? {
                batch.push(record);
            }
        }
        Ok::<_, GraphError>(batch)
    }))
}

pub(crate) fn source_name(path: &Path) -> String {
    path.display().to_string()
}

pub(crate) fn csv_error(path: &Path, err: csv::Error) -> GraphError {
    let line = err.position().map(|pos| pos.line()).unwrap_or(0);
    GraphError::MalformedRecord {
        source_name: source_name(path),
        line,
        reason: err.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use flate2::Compression;
    use flate2::write::GzEncoder;

    use super::*;

    #[test]
    fn source_stem_drops_compression_and_format() {
        assert_eq!(source_stem(Path::new("/data/ENCFF001.bed.gz")), "ENCFF001");
        assert_eq!(source_stem(Path::new("peaks.narrowPeak")), "peaks");
        assert_eq!(source_stem(Path::new("plain")), "plain");
    }

    #[test]
    fn open_input_reads_gzip() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("cells.tsv.gz");
        let mut encoder = GzEncoder::new(File::create(&path).unwrap(), Compression::default());
        encoder.write_all(b"barcode\nAAAC\n").unwrap();
        encoder.finish().unwrap();

        let lines = open_input(&path)
            .unwrap()
            .lines()
            .collect::<Result<Vec<_>, _>>()
            .unwrap();
        assert_eq!(lines, vec!["barcode", "AAAC"]);
    }
}
