use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;

use anyhow::{Context, Result};

/// One timed All-to-All call, as seen by rank 0.
#[derive(Debug, Clone)]
pub struct Sample {
    pub algorithm: String,
    pub shape: String,
    pub failed_links: String,
    pub block_bytes: usize,
    pub iteration: usize,
    pub seconds: f64,
}

const HEADER: &str = "algorithm,shape,failed_links,block_bytes,iteration,seconds";

/// Append samples to `path`, writing the header if the file is new or empty.
pub fn append_samples(path: &Path, samples: &[Sample]) -> Result<()> {
    let needs_header = path.metadata().map(|m| m.len() == 0).unwrap_or(true);
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("Failed to open CSV file: {}", path.display()))?;

    if needs_header {
        writeln!(file, "{HEADER}")?;
    }
    for s in samples {
        writeln!(
            file,
            "{},{},\"{}\",{},{},{:.9}",
            s.algorithm, s.shape, s.failed_links, s.block_bytes, s.iteration, s.seconds
        )?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(iteration: usize) -> Sample {
        Sample {
            algorithm: "mate".into(),
            shape: "4x4".into(),
            failed_links: "0-1,5-6".into(),
            block_bytes: 1024,
            iteration,
            seconds: 0.5,
        }
    }

    #[test]
    fn test_header_written_once() {
        let path = std::env::temp_dir().join(format!("torex-bench-{}.csv", std::process::id()));
        let _ = std::fs::remove_file(&path);

        append_samples(&path, &[sample(0)]).unwrap();
        append_samples(&path, &[sample(1)]).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], HEADER);
        assert_eq!(lines[2], "mate,4x4,\"0-1,5-6\",1024,1,0.500000000");
        std::fs::remove_file(&path).unwrap();
    }
}
