#![allow(dead_code)]

use filemorph::config::Config;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use tempfile::TempDir;

/// Stand-in tool scripts, written once per test binary before any test spawns
/// a process (exec'ing a script another thread is still writing fails with
/// ETXTBSY).
pub struct Fakes {
    dir: TempDir,
}

impl Fakes {
    pub fn path(&self, name: &str) -> String {
        self.dir.path().join(name).display().to_string()
    }

    pub fn counter_log(&self) -> PathBuf {
        self.dir.path().join("count.log")
    }
}

pub fn fakes() -> &'static Fakes {
    static FAKES: OnceLock<Fakes> = OnceLock::new();
    FAKES.get_or_init(|| {
        let dir = tempfile::tempdir().expect("fake tool dir");
        write_script(dir.path(), "magick", FAKE_MAGICK);
        write_script(dir.path(), "gs", FAKE_GS);
        write_script(dir.path(), "soffice", FAKE_SOFFICE);
        write_script(dir.path(), "impostor", "echo 'Impostor Suite 1.0'\n");
        write_script(
            dir.path(),
            "forking-soffice",
            "sleep 3 &\necho 'LibreOffice 7.6.4.1'\n",
        );
        write_script(
            dir.path(),
            "counting-soffice",
            "echo run >> \"$(dirname \"$0\")/count.log\"\nsleep 0.2\necho 'LibreOffice 7.6.4.1'\n",
        );
        Fakes { dir }
    })
}

fn write_script(dir: &Path, name: &str, body: &str) {
    let path = dir.join(name);
    std::fs::write(&path, format!("#!/bin/sh\n{body}")).expect("write fake tool");
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755))
        .expect("chmod fake tool");
}

/// Config pointing at the fake tools, with scratch dirs under `work/scratch`.
pub fn config(work: &Path) -> Config {
    let f = fakes();
    let mut cfg = Config::default();
    cfg.tools.magick = f.path("magick");
    cfg.tools.soffice = f.path("soffice");
    cfg.tools.ghostscript = f.path("gs");
    cfg.paths.work_dir = scratch_root(work).display().to_string();
    cfg.paths.out_dir = work.join("out").display().to_string();
    cfg.runner.poll_interval_ms = 20;
    cfg
}

pub fn scratch_root(work: &Path) -> PathBuf {
    work.join("scratch")
}

/// Names of the entries in `dir`, sorted; a missing dir is empty.
pub fn entries(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = std::fs::read_dir(dir)
        .map(|rd| {
            rd.filter_map(|e| e.ok())
                .map(|e| e.file_name().to_string_lossy().into_owned())
                .collect()
        })
        .unwrap_or_default();
    names.sort();
    names
}

/// Fake PDF: first line is the page count, `fail N` lines break page N.
pub fn fake_pdf(path: &Path, pages: u32, failing: &[u32]) {
    let mut body = format!("{pages}\n");
    for p in failing {
        body.push_str(&format!("fail {p}\n"));
    }
    std::fs::write(path, body).expect("write fake pdf");
}

const FAKE_MAGICK: &str = r#"case "$1" in
  -version)
    echo "Version: ImageMagick 7.1.1-21 Q16-HDRI x86_64"
    exit 0 ;;
  -list)
    cat <<'EOF'
   Format  Module    Mode  Description
-------------------------------------------------------------------------------
     HEIC  HEIC      r--   High Efficiency Image Format
     JPEG* JPEG      rw-   Joint Photographic Experts Group JFIF format
      PNG  PNG       rw+   Portable Network Graphics
     TIFF  TIFF      rw+   Tagged Image File Format
     WEBP  WEBP      rw+   WebP Image Format
EOF
    exit 0 ;;
esac
src="${1%\[0\]}"
for last in "$@"; do :; done
dest="${last#*:}"
if grep -q FAIL "$src"; then
  echo "magick: corrupt image '$src'" >&2
  exit 1
fi
if grep -q TRUNCATE "$src"; then
  echo partial > "$dest"
  echo "magick: write error" >&2
  exit 1
fi
if grep -q HANG "$src"; then
  echo partial > "$dest"
  sleep 30
fi
cp "$src" "$dest"
"#;

const FAKE_GS: &str = r#"if [ "$1" = "--version" ]; then
  echo "10.02.1"
  exit 0
fi
out=""
last=""
for a in "$@"; do
  case "$a" in
    -sOutputFile=*) out="${a#-sOutputFile=}" ;;
    -dLastPage=*) last="${a#-dLastPage=}" ;;
  esac
  input="$a"
done
pages=$(head -n 1 "$input")
if [ -n "$last" ] && [ "$pages" -gt "$last" ]; then
  pages="$last"
fi
i=1
while [ "$i" -le "$pages" ]; do
  f=$(printf "$out" "$i")
  if grep -qx "fail $i" "$input"; then
    echo "page $i FAIL" > "$f"
  else
    echo "page $i" > "$f"
  fi
  i=$((i + 1))
done
"#;

const FAKE_SOFFICE: &str = r#"if [ "$1" = "--version" ]; then
  echo "LibreOffice 7.6.4.1 60(Build:1)"
  exit 0
fi
outdir=""
prev=""
for a in "$@"; do
  if [ "$prev" = "--outdir" ]; then
    outdir="$a"
  fi
  case "$a" in
    -env:UserInstallation=file://*) profile="${a#-env:UserInstallation=file://}" ;;
  esac
  prev="$a"
  input="$a"
done
mkdir -p "$profile/user" && touch "$profile/user/registrymodifications.xcu"
if grep -q SLOW "$input"; then
  sleep 5
fi
if grep -q BROKEN "$input"; then
  echo "Error: source file could not be loaded" >&2
  exit 1
fi
base=$(basename "$input")
stem="${base%.*}"
if grep -q RENAME "$input"; then
  stem="converted"
fi
printf '%%PDF-1.7\n' > "$outdir/$stem.pdf"
cat "$input" >> "$outdir/$stem.pdf"
"#;
