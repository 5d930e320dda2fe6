//! Segment concatenation.

use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::command::{FfmpegCommand, FfmpegRunner};
use crate::encoding::EncodingSettings;
use crate::error::{MediaError, MediaResult};
use crate::probe::{probe_codecs, Codecs};

/// Concat demuxer list for `inputs`.
pub fn build_concat_list(inputs: &[PathBuf]) -> String {
    inputs
        .iter()
        .map(|p| {
            let path = p.to_string_lossy().replace('\'', "'\\''");
            format!("file '{}'\n", path)
        })
        .collect()
}

/// Whether every input reports the same codec pair.
pub fn codecs_match(codecs: &[Codecs]) -> bool {
    match codecs.first() {
        Some(first) => codecs.iter().all(|c| c == first),
        None => true,
    }
}

fn build_concat_filter(count: usize) -> String {
    let mut filter = String::new();
    for i in 0..count {
        filter.push_str(&format!("[{i}:v:0][{i}:a:0]"));
    }
    filter.push_str(&format!("concat=n={count}:v=1:a=1[v][a]"));
    filter
}

/// Join `inputs` in order into `output`.
///
/// Stream-copies when all inputs share codecs, re-encodes otherwise.
pub async fn concat(
    runner: &FfmpegRunner,
    encoding: &EncodingSettings,
    inputs: &[PathBuf],
    output: impl AsRef<Path>,
) -> MediaResult<()> {
    let output = output.as_ref();
    match inputs.len() {
        0 => return Err(MediaError::invalid_argument("nothing to concatenate")),
        1 => {
            tokio::fs::copy(&inputs[0], output).await?;
            return Ok(());
        }
        _ => {}
    }

    let mut codecs = Vec::with_capacity(inputs.len());
    for input in inputs {
        codecs.push(probe_codecs(input).await?);
    }

    if codecs_match(&codecs) {
        let list_path = output.with_extension("concat.txt");
        tokio::fs::write(&list_path, build_concat_list(inputs)).await?;

        let cmd = FfmpegCommand::new(&list_path, output)
            .input_args(["-f", "concat", "-safe", "0"])
            .codec_copy()
            .output_args(["-movflags", "+faststart"]);

        info!(segments = inputs.len(), "Concatenating with stream copy");
        let result = runner.run(&cmd).await;
        let _ = tokio::fs::remove_file(&list_path).await;
        return result;
    }

    warn!(
        segments = inputs.len(),
        "Segment codecs differ, re-encoding during concatenation"
    );
    let mut cmd = FfmpegCommand::new(&inputs[0], output);
    for input in &inputs[1..] {
        cmd = cmd.input(input);
    }
    let cmd = cmd
        .filter_complex(build_concat_filter(inputs.len()))
        .map("[v]")
        .map("[a]");
    let cmd = encoding
        .apply_audio(encoding.apply_video(cmd))
        .output_args(["-movflags", "+faststart"]);
    runner.run(&cmd).await
}
