//! ls command - List entries
//!
//! Lists the location itself followed by its direct children, or the whole
//! tree beneath it with `--recursive`. Paging applies after filtering.

use clap::Args;
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use afs_core::{FileInfo, ListVisitor, Matcher, Options, Page, Result, url};

use crate::exit_code::ExitCode;
use crate::output::Formatter;

/// List entries at and beneath a location
#[derive(Args, Debug)]
pub struct LsArgs {
    /// Location URL (path, file://, scp:// or tar: URL)
    pub url: String,

    /// List recursively
    #[arg(short, long)]
    pub recursive: bool,

    /// Only list entries whose relative path matches this glob
    #[arg(long)]
    pub pattern: Option<String>,

    /// Skip this many matching entries
    #[arg(long, default_value_t = 0)]
    pub offset: usize,

    /// List at most this many entries (0 for no limit)
    #[arg(long, default_value_t = 0)]
    pub limit: usize,

    /// Summarize output (show totals only)
    #[arg(long)]
    pub summarize: bool,
}

/// One listed entry (JSON format)
#[derive(Debug, Serialize)]
struct Item {
    /// Path relative to the listed location
    path: String,
    name: String,
    size_bytes: u64,
    size_human: String,
    mode: String,
    is_dir: bool,
    last_modified: jiff::Timestamp,
}

impl Item {
    fn new(relative: &str, info: &FileInfo) -> Self {
        Self {
            path: url::join_path(relative, &info.name),
            name: info.name.clone(),
            size_bytes: info.size,
            size_human: info.size_human(),
            mode: mode_string(info),
            is_dir: info.is_dir,
            last_modified: info.mod_time,
        }
    }
}

/// Output structure for ls command (JSON format)
#[derive(Debug, Serialize)]
struct LsOutput {
    items: Vec<Item>,
    #[serde(skip_serializing_if = "Option::is_none")]
    summary: Option<Summary>,
}

#[derive(Debug, Serialize)]
struct Summary {
    total_files: usize,
    total_dirs: usize,
    total_size_bytes: u64,
    total_size_human: String,
}

/// Execute the ls command
pub async fn execute(ctx: &CancellationToken, args: LsArgs, formatter: &Formatter) -> ExitCode {
    let matcher = match build_matcher(args.recursive, args.pattern.as_deref()) {
        Ok(matcher) => matcher,
        Err(e) => return formatter.fail("invalid --pattern", &e),
    };
    let manager = match super::manager_for(&args.url, formatter) {
        Ok(manager) => manager,
        Err(code) => return code,
    };

    let mut listing = ListVisitor::new(matcher, Page::new(args.offset, args.limit));
    if let Err(e) = manager
        .walk(ctx, &args.url, &mut listing, &Options::new())
        .await
    {
        return formatter.fail(&format!("list {}", args.url), &e);
    }

    let items = to_items(listing);
    let summary = args.summarize.then(|| summarize(&items));

    if formatter.is_json() {
        formatter.json(&LsOutput { items, summary });
        return ExitCode::Success;
    }

    if !args.summarize {
        for item in &items {
            let date = item.last_modified.strftime("%Y-%m-%d %H:%M:%S");
            let suffix = if item.is_dir { "/" } else { "" };
            formatter.println(&format!(
                "{} [{date}] {:>10} {}{suffix}",
                item.mode, item.size_human, item.path
            ));
        }
    }
    if let Some(summary) = summary {
        formatter.println(&format!(
            "Total: {} files, {} directories, {}",
            summary.total_files, summary.total_dirs, summary.total_size_human
        ));
    }
    ExitCode::Success
}

/// Direct children only unless recursive, intersected with the glob
fn build_matcher(recursive: bool, pattern: Option<&str>) -> Result<Matcher> {
    let glob = pattern.map(Matcher::glob).transpose()?;
    Ok(Matcher::new(move |relative, info| {
        (recursive || relative.is_empty())
            && glob.as_ref().is_none_or(|glob| glob.matches(relative, info))
    }))
}

fn to_items(listing: ListVisitor) -> Vec<Item> {
    listing
        .into_entries()
        .iter()
        .map(|(relative, info)| Item::new(relative, info))
        .collect()
}

fn summarize(items: &[Item]) -> Summary {
    let total_size_bytes = items.iter().map(|i| i.size_bytes).sum();
    Summary {
        total_files: items.iter().filter(|i| !i.is_dir).count(),
        total_dirs: items.iter().filter(|i| i.is_dir).count(),
        total_size_bytes,
        total_size_human: humansize::format_size(total_size_bytes, humansize::BINARY),
    }
}

/// `drwxr-xr-x` style permission string
fn mode_string(info: &FileInfo) -> String {
    let mut out = String::with_capacity(10);
    out.push(if info.is_dir { 'd' } else { '-' });
    for shift in [6, 3, 0] {
        let bits = (info.mode >> shift) & 0o7;
        out.push(if bits & 0o4 != 0 { 'r' } else { '-' });
        out.push(if bits & 0o2 != 0 { 'w' } else { '-' });
        out.push(if bits & 0o1 != 0 { 'x' } else { '-' });
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use afs_core::Visitor;

    #[test]
    fn test_mode_string() {
        assert_eq!(mode_string(&FileInfo::dir("d", 0o755)), "drwxr-xr-x");
        assert_eq!(mode_string(&FileInfo::file("f", 1, 0o640)), "-rw-r-----");
    }

    #[test]
    fn test_matcher_depth_and_pattern() {
        let file = FileInfo::file("c.txt", 1, 0o644);
        let shallow = build_matcher(false, None).unwrap();
        assert!(shallow.matches("", &file));
        assert!(!shallow.matches("b", &file));

        let deep = build_matcher(true, Some("b/*.txt")).unwrap();
        assert!(deep.matches("b", &file));
        assert!(!deep.matches("", &file));

        assert!(build_matcher(true, Some("[")).is_err());
    }

    #[tokio::test]
    async fn test_listing_pages_matching_entries() {
        let mut listing = ListVisitor::new(build_matcher(true, None).unwrap(), Page::new(1, 2));
        let mut empty = tokio::io::empty();
        let entries = [
            ("", FileInfo::dir("data", 0o755)),
            ("", FileInfo::file("a.txt", 3, 0o644)),
            ("", FileInfo::dir("b", 0o755)),
            ("b", FileInfo::file("c.txt", 5, 0o644)),
        ];
        for (relative, info) in &entries {
            if !listing.visit(relative, info, &mut empty).await.unwrap() {
                break;
            }
        }
        let paths: Vec<_> = to_items(listing).into_iter().map(|i| i.path).collect();
        assert_eq!(paths, vec!["a.txt", "b"]);
    }

    #[test]
    fn test_summarize() {
        let items = vec![
            Item::new("", &FileInfo::dir("b", 0o755)),
            Item::new("b", &FileInfo::file("c.txt", 2048, 0o644)),
        ];
        let summary = summarize(&items);
        assert_eq!(summary.total_files, 1);
        assert_eq!(summary.total_dirs, 1);
        assert_eq!(summary.total_size_bytes, 2048);
    }
}
