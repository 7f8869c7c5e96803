use std::path::Path;

use crate::models::chunk::Chunk;
use crate::models::profile::CopyOptions;

/// Build the copy tool argument vector for one chunk.
///
/// Subtree chunks recurse (`/E`, or `/MIR` when mirroring); files-only
/// chunks rely on the tool's default of copying just the directory's own
/// files, with `/PURGE` standing in for mirror semantics at that level.
/// `/BYTES` keeps all sizes machine-parseable and `/TEE` mirrors the log to
/// stdout for the streaming progress parser.
pub fn build_copy_args(chunk: &Chunk, options: &CopyOptions, log_path: &Path) -> Vec<String> {
    let mut args = vec![chunk.source.clone(), chunk.destination.clone()];

    if chunk.files_only {
        if options.mirror {
            args.push("/PURGE".to_string());
        }
    } else if options.mirror {
        args.push("/MIR".to_string());
    } else {
        args.push("/E".to_string());
    }

    args.push("/BYTES".to_string());
    args.push("/FP".to_string());
    args.push("/NJH".to_string());
    args.push("/TEE".to_string());

    if let Some(threads) = options.threads_per_worker {
        args.push(format!("/MT:{}", threads));
    }

    args.push(format!("/R:{}", options.tool_retries));
    args.push(format!("/W:{}", options.tool_retry_wait_secs));

    if let Some(gap) = options.inter_packet_gap_ms {
        args.push(format!("/IPG:{}", gap));
    }

    if !options.exclude_dirs.is_empty() {
        args.push("/XD".to_string());
        args.extend(options.exclude_dirs.iter().cloned());
    }
    if !options.exclude_files.is_empty() {
        args.push("/XF".to_string());
        args.extend(options.exclude_files.iter().cloned());
    }

    match shell_words::split(&options.extra_args) {
        Ok(extra) => args.extend(extra),
        Err(e) => log::warn!("ignoring unparseable extra copy args: {}", e),
    }

    args.push(format!("/LOG:{}", log_path.display()));

    args
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn chunk(files_only: bool) -> Chunk {
        Chunk::new(
            7,
            "C:\\data\\docs".into(),
            "E:\\backup\\docs".into(),
            1024,
            10,
            1,
            files_only,
        )
    }

    fn log_path() -> PathBuf {
        PathBuf::from("C:\\logs\\chunk-7.log")
    }

    #[test]
    fn subtree_chunk_recurses() {
        let args = build_copy_args(&chunk(false), &CopyOptions::default(), &log_path());
        assert_eq!(args[0], "C:\\data\\docs");
        assert_eq!(args[1], "E:\\backup\\docs");
        assert!(args.contains(&"/E".to_string()));
        assert!(!args.contains(&"/MIR".to_string()));
    }

    #[test]
    fn mirror_subtree_uses_mir() {
        let options = CopyOptions {
            mirror: true,
            ..Default::default()
        };
        let args = build_copy_args(&chunk(false), &options, &log_path());
        assert!(args.contains(&"/MIR".to_string()));
        assert!(!args.contains(&"/E".to_string()));
    }

    #[test]
    fn files_only_chunk_does_not_recurse() {
        let args = build_copy_args(&chunk(true), &CopyOptions::default(), &log_path());
        assert!(!args.contains(&"/E".to_string()));
        assert!(!args.contains(&"/MIR".to_string()));
    }

    #[test]
    fn files_only_mirror_purges_at_level() {
        let options = CopyOptions {
            mirror: true,
            ..Default::default()
        };
        let args = build_copy_args(&chunk(true), &options, &log_path());
        assert!(args.contains(&"/PURGE".to_string()));
        assert!(!args.contains(&"/MIR".to_string()));
    }

    #[test]
    fn throttle_and_threads_flags() {
        let options = CopyOptions {
            threads_per_worker: Some(16),
            inter_packet_gap_ms: Some(50),
            ..Default::default()
        };
        let args = build_copy_args(&chunk(false), &options, &log_path());
        assert!(args.contains(&"/MT:16".to_string()));
        assert!(args.contains(&"/IPG:50".to_string()));
    }

    #[test]
    fn excludes_grouped_after_flags() {
        let options = CopyOptions {
            exclude_dirs: vec!["node_modules".into(), "$RECYCLE.BIN".into()],
            exclude_files: vec!["*.tmp".into()],
            ..Default::default()
        };
        let args = build_copy_args(&chunk(false), &options, &log_path());
        let xd = args.iter().position(|a| a == "/XD").unwrap();
        assert_eq!(args[xd + 1], "node_modules");
        assert_eq!(args[xd + 2], "$RECYCLE.BIN");
        let xf = args.iter().position(|a| a == "/XF").unwrap();
        assert_eq!(args[xf + 1], "*.tmp");
    }

    #[test]
    fn extra_args_are_shell_split() {
        let options = CopyOptions {
            extra_args: "/XA:H \"/XD\" ".into(),
            ..Default::default()
        };
        let args = build_copy_args(&chunk(false), &options, &log_path());
        assert!(args.contains(&"/XA:H".to_string()));
    }

    #[test]
    fn tool_retry_and_log_flags_always_present() {
        let args = build_copy_args(&chunk(false), &CopyOptions::default(), &log_path());
        assert!(args.contains(&"/R:2".to_string()));
        assert!(args.contains(&"/W:5".to_string()));
        assert!(args.contains(&"/BYTES".to_string()));
        assert!(args
            .iter()
            .any(|a| a.starts_with("/LOG:") && a.ends_with("chunk-7.log")));
    }
}
