use crate::adata::AnnMatrix;
use crate::error::{Error, Result};
use flate2::bufread::MultiGzDecoder;
use log::info;
use sprs::TriMat;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

/// Open a file that may or may not be gzipped, trying `name.gz` first.
fn open_maybe_gz(dir: &Path, name: &str) -> Result<Option<Box<dyn BufRead>>> {
    let gz: PathBuf = dir.join(format!("{name}.gz"));
    if gz.is_file() {
        let file = BufReader::new(File::open(&gz)?);
        return Ok(Some(Box::new(BufReader::new(MultiGzDecoder::new(file)))));
    }
    let plain = dir.join(name);
    if plain.is_file() {
        return Ok(Some(Box::new(BufReader::new(File::open(&plain)?))));
    }
    Ok(None)
}

fn require(dir: &Path, names: &[&str]) -> Result<Box<dyn BufRead>> {
    for name in names {
        if let Some(reader) = open_maybe_gz(dir, name)? {
            return Ok(reader);
        }
    }
    Err(Error::InputFormat(format!(
        "none of {:?} (or .gz) found in {}",
        names,
        dir.display()
    )))
}

/// Load a 10X triple-file gene expression directory (`matrix.mtx`,
/// `features.tsv` or `genes.tsv`, `barcodes.tsv`, each optionally gzipped).
/// The MatrixMarket triples are genes x cells on disk and are transposed to
/// a cells x genes matrix here. `sample` becomes the batch label of every
/// cell.
pub fn load_tenx_dir(dir: impl AsRef<Path>, sample: &str) -> Result<AnnMatrix> {
    let dir = dir.as_ref();

    let (gene_ids, gene_symbols) = load_features(require(dir, &["features.tsv", "genes.tsv"])?)?;
    let barcodes = load_lines(require(dir, &["barcodes.tsv"])?)?;
    let counts = load_mtx_transposed(require(dir, &["matrix.mtx"])?, gene_ids.len(), barcodes.len())?;

    info!(
        "loaded {}: {} cells x {} genes, {} non-zeros",
        dir.display(),
        barcodes.len(),
        gene_ids.len(),
        counts.nnz()
    );

    AnnMatrix::new(counts, barcodes, gene_ids, gene_symbols, sample)
}

fn load_features(reader: Box<dyn BufRead>) -> Result<(Vec<String>, Vec<String>)> {
    let mut ids = Vec::new();
    let mut symbols = Vec::new();
    for (n, line) in reader.lines().enumerate() {
        let line = line?;
        if line.is_empty() {
            continue;
        }
        let mut fields = line.split('\t');
        let id = fields
            .next()
            .ok_or_else(|| Error::InputFormat(format!("features line {}: missing id", n + 1)))?;
        // genes.tsv has two columns, features.tsv adds a feature type
        let symbol = fields.next().unwrap_or(id);
        ids.push(id.to_string());
        symbols.push(symbol.to_string());
    }
    if ids.is_empty() {
        return Err(Error::InputFormat("empty features file".to_string()));
    }
    Ok((ids, symbols))
}

fn load_lines(reader: Box<dyn BufRead>) -> Result<Vec<String>> {
    let mut out = Vec::new();
    for line in reader.lines() {
        let line = line?;
        if !line.is_empty() {
            // barcodes.tsv may carry extra columns; the barcode is first
            out.push(line.split('\t').next().unwrap_or(&line).to_string());
        }
    }
    if out.is_empty() {
        return Err(Error::InputFormat("empty barcodes file".to_string()));
    }
    Ok(out)
}

fn load_mtx_transposed(mut reader: Box<dyn BufRead>, n_genes: usize, n_cells: usize) -> Result<sprs::CsMat<u32>> {
    let mut line = String::new();
    let mut mat: Option<TriMat<u32>> = None;
    let mut lineno = 0usize;

    let parse =
        |tok: Option<&str>, what: &str, lineno: usize| -> Result<usize> {
            tok.ok_or_else(|| Error::InputFormat(format!("matrix line {lineno}: missing {what}")))?
                .parse::<usize>()
                .map_err(|e| Error::InputFormat(format!("matrix line {lineno}: bad {what}: {e}")))
        };

    loop {
        let sz = reader.read_line(&mut line)?;
        if sz == 0 {
            break;
        }
        lineno += 1;
        if line.starts_with('%') || line.trim().is_empty() {
            line.clear();
            continue;
        }
        let mut data = line.split_whitespace();
        if mat.is_none() {
            let nrow = parse(data.next(), "NROW", lineno)?;
            let ncol = parse(data.next(), "NCOL", lineno)?;
            let nnz = parse(data.next(), "NNZ", lineno)?;
            if nrow != n_genes || ncol != n_cells {
                return Err(Error::InputFormat(format!(
                    "matrix is {nrow} x {ncol} but there are {n_genes} features and {n_cells} barcodes"
                )));
            }
            // transposed: cells in rows
            mat = Some(TriMat::with_capacity((ncol, nrow), nnz));
        } else {
            let gene = parse(data.next(), "ROW", lineno)? - 1;
            let cell = parse(data.next(), "COL", lineno)? - 1;
            let val = parse(data.next(), "VAL", lineno)? as u32;
            if gene >= n_genes || cell >= n_cells {
                return Err(Error::InputFormat(format!(
                    "matrix line {lineno}: entry ({}, {}) out of bounds",
                    gene + 1,
                    cell + 1
                )));
            }
            mat.as_mut().unwrap().add_triplet(cell, gene, val);
        }
        line.clear();
    }

    match mat {
        Some(matrix) => Ok(matrix.to_csr()),
        None => Err(Error::InputFormat("no matrix found".to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_sample(dir: &Path) {
        std::fs::write(
            dir.join("matrix.mtx"),
            "%%MatrixMarket matrix coordinate integer general\n\
             %\n\
             3 2 4\n\
             1 1 5\n\
             3 1 2\n\
             2 2 1\n\
             3 2 9\n",
        )
        .unwrap();
        std::fs::write(dir.join("genes.tsv"), "ENSG1\tTP53\nENSG2\tMT-CO1\nENSG3\tTP53\n").unwrap();
        std::fs::write(dir.join("barcodes.tsv"), "AAAC-1\nAAAG-1\n").unwrap();
    }

    #[test]
    fn test_load_plain_dir() {
        let dir = tempfile::tempdir().unwrap();
        write_sample(dir.path());
        let m = load_tenx_dir(dir.path(), "s1").unwrap();

        // transposed to cells x genes
        assert_eq!(m.n_cells(), 2);
        assert_eq!(m.n_genes(), 3);
        assert_eq!(m.counts.get(0, 0), Some(&5));
        assert_eq!(m.counts.get(0, 2), Some(&2));
        assert_eq!(m.counts.get(1, 1), Some(&1));
        assert_eq!(m.counts.get(1, 2), Some(&9));

        // duplicate symbol deduplicated at load
        assert_eq!(m.gene_symbols, vec!["TP53", "MT-CO1", "TP53-1"]);
        assert_eq!(m.obs.batch, vec!["s1", "s1"]);
    }

    #[test]
    fn test_load_gz_dir() {
        let dir = tempfile::tempdir().unwrap();
        write_sample(dir.path());

        // re-compress each file and remove the plain version
        for name in ["matrix.mtx", "genes.tsv", "barcodes.tsv"] {
            let plain = dir.path().join(name);
            let content = std::fs::read(&plain).unwrap();
            let out = File::create(dir.path().join(format!("{name}.gz"))).unwrap();
            let mut enc = flate2::write::GzEncoder::new(out, flate2::Compression::default());
            enc.write_all(&content).unwrap();
            enc.finish().unwrap();
            std::fs::remove_file(plain).unwrap();
        }

        let m = load_tenx_dir(dir.path(), "s1").unwrap();
        assert_eq!(m.n_cells(), 2);
        assert_eq!(m.n_genes(), 3);
        assert_eq!(m.counts.get(1, 2), Some(&9));
    }

    #[test]
    fn test_dimension_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        write_sample(dir.path());
        std::fs::write(dir.path().join("barcodes.tsv"), "AAAC-1\n").unwrap();
        let r = load_tenx_dir(dir.path(), "s1");
        assert!(matches!(r, Err(Error::InputFormat(_))));
    }

    #[test]
    fn test_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        write_sample(dir.path());
        std::fs::remove_file(dir.path().join("matrix.mtx")).unwrap();
        let r = load_tenx_dir(dir.path(), "s1");
        assert!(matches!(r, Err(Error::InputFormat(_))));
    }
}
