//! Result decoders: reply lines → typed results.
//!
//! - `is_error`: failure-phrase scan (substring match, so a file literally
//!   named after a failure phrase is a false positive)
//! - `parse_listing`: `ls -l` long format
//! - `parse_pwd`: `Remote working directory: /x`
//! - `parse_help`: flag discovery for the [`CommandOptions`] registry
//! - `parse_progress`: `NN%` fragments of transfer progress output

use crate::sftp_cli::error::SftpCliError;
use crate::sftp_cli::types::{DirEntry, ListingFlags, TransferProgress};
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

lazy_static! {
    static ref LONG_LISTING: Regex = Regex::new(
        r"(?x)
        ^([\-dlbcps?][rwxsStTl\-]{9}[.+@]?)  # permissions
        \s+(\d+)                             # hard links
        \s+(\S+)                             # owner
        \s+(\S+)                             # group
        \s+(\d+)                             # size
        \s+(\w{3}\s+\d{1,2}\s+(?:\d{1,2}:\d{2}|\d{4}))  # month day time|year
        \s+(.+)$                             # path
        "
    )
    .expect("long listing regex");
    static ref HELP_LINE: Regex =
        Regex::new(r"^([a-z][a-z0-9-]*|!|\?)(?:\s+(.*))?$").expect("help line regex");
    static ref HELP_FLAGS: Regex = Regex::new(r"\[-([A-Za-z0-9]+)\]").expect("help flags regex");
    static ref PERCENT: Regex = Regex::new(r"(\d{1,3})%").expect("percent regex");
}

// ── Error detection ─────────────────────────────────────────────────────

/// First line containing one of `phrases`, as an error.
pub fn is_error(lines: &[String], phrases: &[String]) -> Option<SftpCliError> {
    let line = lines
        .iter()
        .find(|l| phrases.iter().any(|p| l.contains(p.as_str())))?;
    let text = line.trim();
    if text.contains("No such file") || text.contains("not found") {
        Some(SftpCliError::not_found(text))
    } else {
        Some(SftpCliError::command_failed(text))
    }
}

// ── Listing ─────────────────────────────────────────────────────────────

/// Decode `ls -l` output. Non-matching lines and `.`/`..` entries are skipped.
pub fn parse_listing(lines: &[String]) -> Vec<DirEntry> {
    lines
        .iter()
        .map(|l| l.trim())
        .filter(|l| !l.is_empty())
        .filter_map(parse_listing_line)
        .filter(|e| !is_dot_entry(&e.path))
        .collect()
}

pub fn parse_listing_line(line: &str) -> Option<DirEntry> {
    let caps = LONG_LISTING.captures(line)?;
    let permissions = caps[1].to_string();
    let mut path = caps[7].to_string();
    let mut link_target = None;
    if permissions.starts_with('l') {
        if let Some((name, target)) = path.split_once(" -> ") {
            link_target = Some(target.to_string());
            path = name.to_string();
        }
    }
    Some(DirEntry {
        permissions,
        hard_links: caps[2].parse().ok()?,
        owner: caps[3].to_string(),
        group: caps[4].to_string(),
        size: caps[5].parse().ok()?,
        last_modified: caps[6].to_string(),
        path,
        link_target,
    })
}

fn is_dot_entry(path: &str) -> bool {
    path == "." || path == ".." || path.ends_with("/.") || path.ends_with("/..")
}

// ── pwd ─────────────────────────────────────────────────────────────────

/// Everything after the first colon of the working-directory line, trimmed.
pub fn parse_pwd(lines: &[String]) -> Option<String> {
    let line = lines
        .iter()
        .find(|l| l.contains("working directory"))
        .or_else(|| lines.iter().find(|l| l.contains(':')))?;
    let (_, rest) = line.split_once(':')?;
    let path = rest.trim();
    if path.is_empty() {
        None
    } else {
        Some(path.to_string())
    }
}

// ── help → option registry ──────────────────────────────────────────────

/// Flags each command advertises in `help`, discovered once per connection.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandOptions {
    commands: BTreeMap<String, BTreeSet<char>>,
}

impl CommandOptions {
    pub fn supports(&self, command: &str, flag: char) -> bool {
        self.commands
            .get(command)
            .map_or(false, |flags| flags.contains(&flag))
    }

    #[cfg(test)]
    pub(crate) fn knows(&self, command: &str) -> bool {
        self.commands.contains_key(command)
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    /// Flag word for `ls`: `-l` always, the rest only when advertised.
    pub fn listing_flags(&self, wanted: &ListingFlags) -> String {
        let mut flags = String::from("-l");
        for (enabled, flag) in [
            (wanted.all, 'a'),
            (wanted.numeric_ids, 'n'),
            (wanted.sort_by_time, 't'),
        ] {
            if enabled && self.supports("ls", flag) {
                flags.push(flag);
            }
        }
        flags
    }
}

pub fn parse_help(lines: &[String]) -> CommandOptions {
    let mut options = CommandOptions::default();
    for line in lines {
        let Some(caps) = HELP_LINE.captures(line.trim()) else {
            continue;
        };
        let flags = options.commands.entry(caps[1].to_string()).or_default();
        if let Some(usage) = caps.get(2) {
            for group in HELP_FLAGS.captures_iter(usage.as_str()) {
                flags.extend(group[1].chars());
            }
        }
    }
    options
}

// ── Progress ────────────────────────────────────────────────────────────

/// Last `NN%` in a progress chunk.
pub fn parse_progress(chunk: &str) -> Option<TransferProgress> {
    let percent = PERCENT
        .captures_iter(chunk)
        .filter_map(|c| c[1].parse::<u8>().ok())
        .filter(|p| *p <= 100)
        .last()?;
    Some(TransferProgress {
        percent,
        raw: chunk.trim().to_string(),
    })
}

// ── Command-line quoting ────────────────────────────────────────────────

/// Quote a path for the sftp command line; glob characters are escaped.
pub fn quote_path(path: &str) -> String {
    let mut out = String::with_capacity(path.len() + 2);
    out.push('"');
    for c in path.chars() {
        if matches!(c, '"' | '\\' | '*' | '?' | '[' | ']') {
            out.push('\\');
        }
        out.push(c);
    }
    out.push('"');
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sftp_cli::error::SftpCliErrorKind;
    use crate::sftp_cli::types::{EntryKind, ReplyMarkers, StatRecord};

    fn lines(raw: &[&str]) -> Vec<String> {
        raw.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn listing_line_decodes_all_fields() {
        let out = parse_listing(&lines(&[
            "-rw-r--r--   1 alice  staff   1024 Jan  1 00:00 file.txt",
        ]));
        assert_eq!(out.len(), 1);
        let e = &out[0];
        assert_eq!(e.permissions, "-rw-r--r--");
        assert_eq!(e.hard_links, 1);
        assert_eq!(e.owner, "alice");
        assert_eq!(e.group, "staff");
        assert_eq!(e.size, 1024);
        assert_eq!(e.last_modified, "Jan  1 00:00");
        assert_eq!(e.path, "file.txt");
        let stat = StatRecord::from(e.clone());
        assert!(stat.is_file());
        assert!(!stat.is_directory());
    }

    #[test]
    fn listing_skips_noise_and_dot_entries() {
        let raw = lines(&[
            "ls -la /srv",
            "drwxr-xr-x    5 root     root         4096 Mar  1 09:30 /srv/.",
            "drwxr-xr-x   20 root     root         4096 Mar  1 09:30 /srv/..",
            "drwxr-xr-x    2 root     root         4096 Dec 24  2023 /srv/data",
            "",
            "total 12",
            "-rw-------    1 1000     1000           18 Feb 29 23:59 /srv/my file.txt",
        ]);
        let out = parse_listing(&raw);
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].kind(), EntryKind::Directory);
        assert_eq!(out[0].last_modified, "Dec 24  2023");
        assert_eq!(out[1].path, "/srv/my file.txt");
        assert_eq!(out[1].name(), "my file.txt");
        assert_eq!(out[1].owner, "1000");
    }

    #[test]
    fn listing_splits_symlink_target() {
        let e = parse_listing_line("lrwxrwxrwx    1 root root 22 Jan  5 08:00 /srv/current -> /srv/releases/42")
            .unwrap();
        assert_eq!(e.path, "/srv/current");
        assert_eq!(e.link_target.as_deref(), Some("/srv/releases/42"));
        assert_eq!(e.kind(), EntryKind::Symlink);
    }

    #[test]
    fn error_detection() {
        let phrases = ReplyMarkers::default().failure_phrases;
        let bad = lines(&["stat /nope", "Couldn't stat remote file: No such file or directory"]);
        let err = is_error(&bad, &phrases).unwrap();
        assert_eq!(err.message, "Couldn't stat remote file: No such file or directory");
        assert_eq!(err.kind, SftpCliErrorKind::NotFound);

        let denied = lines(&["remote mkdir \"/root/x\": Permission denied"]);
        assert_eq!(is_error(&denied, &phrases).unwrap().kind, SftpCliErrorKind::CommandFailed);

        let fine = lines(&["-rw-r--r-- 1 a b 1 Jan  1 00:00 ok.txt"]);
        assert!(is_error(&fine, &phrases).is_none());
        assert!(is_error(&[], &phrases).is_none());
    }

    #[test]
    fn pwd_decodes() {
        assert_eq!(
            parse_pwd(&lines(&["Remote working directory: /home/alice"])).as_deref(),
            Some("/home/alice")
        );
        assert_eq!(
            parse_pwd(&lines(&["noise", "Remote working directory:   /srv/x y  "])).as_deref(),
            Some("/srv/x y")
        );
        assert_eq!(parse_pwd(&lines(&["no colon here"])), None);
    }

    #[test]
    fn help_populates_registry() {
        let raw = lines(&[
            "Available commands:",
            "bye                                Quit sftp",
            "cd path                            Change remote directory to 'path'",
            "get [-afpR] remote [local]         Download file",
            "ls [-1afhlnrSt] [path]             Display remote directory listing",
            "!command                           Execute 'command' in local shell",
            "?                                  Synonym for help",
        ]);
        let opts = parse_help(&raw);
        assert!(opts.knows("bye"));
        assert!(opts.knows("cd"));
        assert!(!opts.knows("Available"));
        assert!(opts.supports("ls", 'l'));
        assert!(opts.supports("ls", 't'));
        assert!(opts.supports("get", 'R'));
        assert!(!opts.supports("cd", 'l'));
        assert!(opts.knows("?"));
    }

    #[test]
    fn listing_flags_follow_registry() {
        let full = parse_help(&lines(&["ls [-1afhlnrSt] [path]   list"]));
        let bare = parse_help(&lines(&["ls [path]   list"]));
        let all_on = ListingFlags {
            all: true,
            numeric_ids: true,
            sort_by_time: true,
        };
        assert_eq!(full.listing_flags(&all_on), "-lant");
        assert_eq!(full.listing_flags(&ListingFlags::default()), "-la");
        assert_eq!(bare.listing_flags(&all_on), "-l");
    }

    #[test]
    fn progress_takes_last_percentage() {
        let p =
            parse_progress("big.iso    12%  128MB  10.2MB/s   01:20 ETA\rbig.iso    13%").unwrap();
        assert_eq!(p.percent, 13);
        assert!(parse_progress("Fetching /x to y").is_none());
        assert!(parse_progress("450%").is_none());
    }

    #[test]
    fn quoting_escapes_specials() {
        assert_eq!(quote_path("/tmp/a b"), "\"/tmp/a b\"");
        assert_eq!(quote_path("we\"ird*"), "\"we\\\"ird\\*\"");
    }
}
