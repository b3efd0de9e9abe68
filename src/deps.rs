//src/deps.rs

use std::path::PathBuf;
use std::process::{Command, Stdio};

use regex::Regex;
use which::which;

use crate::config::RunConfig;
use crate::error::{Result, ShovillError};

/// Every external program, with the arguments that make it print its
/// version. Several print it in their usage text and exit non-zero.
const TOOLS: &[(&str, &[&str])] = &[
    ("seqtk", &[]),
    ("kmc", &[]),
    ("trimmomatic", &["-version"]),
    ("lighter", &["-v"]),
    ("flash", &["--version"]),
    ("spades.py", &["--version"]),
    ("skesa", &["--version"]),
    ("megahit", &["--version"]),
    ("megahit_toolkit", &["dumpversion"]),
    ("velveth", &[]),
    ("velvetg", &[]),
    ("bwa", &[]),
    ("samtools", &["--version"]),
    ("pilon", &["--version"]),
];

/// A located tool and the version it reported.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolVersion {
    pub program: String,
    pub path: PathBuf,
    pub version: String,
}

/// Programs this run will invoke.
pub fn required_programs(cfg: &RunConfig) -> Vec<&'static str> {
    let mut programs = Vec::new();
    if cfg.depth > 0 {
        programs.push("seqtk");
    }
    if cfg.gsize.is_none() {
        programs.push("kmc");
    }
    if cfg.trim {
        programs.push("trimmomatic");
    }
    if cfg.read_correction {
        programs.push("lighter");
    }
    if cfg.stitch {
        programs.push("flash");
    }
    programs.extend_from_slice(cfg.assembler.programs());
    if cfg.polish {
        programs.extend_from_slice(&["bwa", "samtools", "pilon"]);
    }
    programs
}

/// Every program any configuration could need.
pub fn all_programs() -> Vec<&'static str> {
    TOOLS.iter().map(|(name, _)| *name).collect()
}

/// First dotted version number in a tool's banner, e.g. `0.7.17` out of
/// `Version: 0.7.17-r1188`.
pub fn parse_version(text: &str) -> Option<String> {
    let re = Regex::new(r"(\d+\.\d+(?:\.\d+)?)").ok()?;
    re.captures(text).map(|caps| caps[1].to_string())
}

fn version_args(program: &str) -> &'static [&'static str] {
    TOOLS
        .iter()
        .find(|(name, _)| *name == program)
        .map(|(_, args)| *args)
        .unwrap_or(&["--version"])
}

/// Locate `program` on `PATH` and read its version.
pub fn check_tool(program: &str) -> Result<ToolVersion> {
    let path = which(program).map_err(|_| {
        ShovillError::dependency(format!("required program '{program}' not found in $PATH"))
    })?;

    let output = Command::new(&path)
        .args(version_args(program))
        .stdin(Stdio::null())
        .output()
        .map_err(|e| ShovillError::dependency(format!("could not run '{program}': {e}")))?;

    let text = format!(
        "{}\n{}",
        String::from_utf8_lossy(&output.stdout),
        String::from_utf8_lossy(&output.stderr)
    );
    let version = parse_version(&text).ok_or_else(|| {
        ShovillError::dependency(format!("could not determine version of '{program}'"))
    })?;

    Ok(ToolVersion {
        program: program.to_string(),
        path,
        version,
    })
}

/// Check every program in `programs`, stopping at the first failure.
pub fn check_dependencies(programs: &[&str]) -> Result<Vec<ToolVersion>> {
    let mut found = Vec::with_capacity(programs.len());
    for program in programs {
        found.push(check_tool(program)?);
    }
    Ok(found)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assemble::test_support::config_in;
    use crate::assemble::Assembler;
    use tempfile::tempdir;

    #[test]
    fn test_parse_version() {
        assert_eq!(parse_version("Version: 0.7.17-r1188").as_deref(), Some("0.7.17"));
        assert_eq!(parse_version("SPAdes genome assembler v3.15.5").as_deref(), Some("3.15.5"));
        assert_eq!(parse_version("samtools 1.17\nUsing htslib 1.17").as_deref(), Some("1.17"));
        assert_eq!(parse_version("no numbers here"), None);
    }

    #[test]
    fn test_required_programs_follow_config() {
        let dir = tempdir().unwrap();
        let cfg = config_in(dir.path(), &[]);
        let programs = required_programs(&cfg);
        assert!(programs.contains(&"kmc"));
        assert!(programs.contains(&"spades.py"));
        assert!(programs.contains(&"pilon"));
        assert!(!programs.contains(&"trimmomatic"));

        let cfg = config_in(
            dir.path(),
            &["--gsize", "5M", "--nocorr", "--nostitch", "--noreadcorr", "--depth", "0", "--assembler", "skesa"],
        );
        assert_eq!(required_programs(&cfg), vec!["skesa"]);
    }

    #[test]
    fn test_all_programs_unique() {
        let programs = all_programs();
        assert_eq!(programs.len(), TOOLS.len());
        let mut sorted = programs.clone();
        sorted.sort_unstable();
        sorted.dedup();
        assert_eq!(sorted.len(), programs.len());
    }

    #[test]
    fn test_assembler_programs_have_version_args() {
        for assembler in [Assembler::Spades, Assembler::Skesa, Assembler::Megahit, Assembler::Velvet] {
            for program in assembler.programs() {
                assert!(TOOLS.iter().any(|(name, _)| name == program), "{program}");
            }
        }
    }

    #[test]
    fn test_missing_tool() {
        let err = check_tool("no-such-tool-shovill-rs").unwrap_err();
        assert!(matches!(err, ShovillError::Dependency(_)));
    }
}
