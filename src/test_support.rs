//! Stand-ins for the external count tools, used by the tests.
//!
//! Counts are text here: one `<history>\t<rest>` line per entry. The
//! stand-ins honor the same I/O contracts as the real tools.

use crate::config::ToolsConfig;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use tempfile::TempDir;

const EXTRACT: &str = r#"#!/bin/sh
if [ $# -ne 0 ]; then
  echo "extract-latest-histories: expected usage: extract-latest-histories <counts >hist" >&2
  exit 1
fi
cut -f1 | LC_ALL=C sort -u
echo "extract-latest-histories: done" >&2
"#;

const NUMERIC_EXTRACT: &str = r#"#!/bin/sh
cut -f1 | sort -n -u
"#;

const FILTER: &str = r#"#!/bin/sh
if [ $# -ne 2 ]; then
  echo "filter-int-counts: expected usage: <int-counts> <hist-list>" >&2
  exit 1
fi
[ -r "$1" ] || { echo "filter-int-counts: error opening '$1'" >&2; exit 1; }
[ -r "$2" ] || { echo "filter-int-counts: error opening '$2'" >&2; exit 1; }
awk -F'\t' 'FILENAME == ARGV[1] { keep[$0] = 1; next } ($1 in keep)' "$2" "$1"
"#;

const SPLIT: &str = r#"#!/bin/sh
if [ $# -lt 1 ]; then
  echo "split-int-counts: expected at least one output" >&2
  exit 1
fi
awk -v n=$# 'BEGIN { for (i = 1; i <= n; i++) { out[i] = ARGV[i]; printf "" > out[i]; ARGV[i] = "" } }
  { print > out[(NR - 1) % n + 1] }' "$@"
"#;

const VALIDATE: &str = r#"#!/bin/sh
[ -d "$1" ] && [ -f "$1/num_train_sets" ] && [ -f "$1/names" ] || {
  echo "validate_count_dir.py: $1 is not a count directory" >&2
  exit 1
}
"#;

const FAIL: &str = "#!/bin/sh\necho \"tool failed on purpose\" >&2\nexit 1\n";

const REJECT_FILTERED: &str = r#"#!/bin/sh
case "$1" in
  *filtered*) echo "validate_count_dir.py: rejecting $1" >&2; exit 1 ;;
esac
exit 0
"#;

/// A directory of executable tool stand-ins, shared by every test.
pub struct FakeTools {
    dir: TempDir,
}

impl FakeTools {
    /// The shared instance; scripts are written once so no test execs a
    /// file another thread still has open for writing.
    pub fn get() -> &'static FakeTools {
        static TOOLS: OnceLock<FakeTools> = OnceLock::new();
        TOOLS.get_or_init(|| {
            let dir = TempDir::new().expect("create tools dir");
            for (name, script) in [
                ("extract-latest-histories", EXTRACT),
                ("numeric-extract-histories", NUMERIC_EXTRACT),
                ("filter-int-counts", FILTER),
                ("split-int-counts", SPLIT),
                ("validate_count_dir.py", VALIDATE),
                ("failing-tool", FAIL),
                ("reject-filtered-validator", REJECT_FILTERED),
            ] {
                install(dir.path(), name, script);
            }
            FakeTools { dir }
        })
    }

    pub fn dir(&self) -> &Path {
        self.dir.path()
    }

    pub fn path(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    /// Tools config pointing at the stand-ins.
    pub fn config(&self) -> ToolsConfig {
        ToolsConfig {
            bin_dir: Some(self.dir().to_path_buf()),
            ..Default::default()
        }
    }
}

fn install(dir: &Path, name: &str, script: &str) {
    let path = dir.join(name);
    std::fs::write(&path, script).expect("write tool script");
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755))
        .expect("make tool executable");
}

/// Write an input count directory with the given training and dev counts.
///
/// `train` holds `(source, order, contents)`, `dev` holds `(order, contents)`.
pub fn write_count_dir(
    root: &Path,
    num_sources: usize,
    train: &[(usize, usize, &str)],
    dev: &[(usize, &str)],
) {
    std::fs::create_dir_all(root).unwrap();
    std::fs::write(root.join("num_train_sets"), format!("{}\n", num_sources)).unwrap();
    std::fs::write(root.join("num_words"), "6\n").unwrap();
    let names: String = (1..=num_sources)
        .map(|n| format!("{} source{}\n", n, n))
        .collect();
    std::fs::write(root.join("names"), names).unwrap();
    std::fs::write(root.join("words.txt"), "<s> 1\n</s> 2\na 3\nb 4\nc 5\nd 6\n").unwrap();

    let mut all_dev = String::new();
    for (order, contents) in dev {
        std::fs::write(root.join(format!("int.dev.{}", order)), contents).unwrap();
        all_dev.push_str(contents);
    }
    std::fs::write(root.join("int.dev"), all_dev).unwrap();

    for (source, order, contents) in train {
        std::fs::write(root.join(format!("int.{}.{}", source, order)), contents).unwrap();
    }
}
