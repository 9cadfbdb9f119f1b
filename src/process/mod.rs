//! Process inspection: everything that reads `/proc/<pid>`.

pub mod identity;
pub mod lifecycle;
pub mod lock;

use std::collections::VecDeque;
use std::fs;
use std::os::unix::fs::MetadataExt;
use std::path::Path;
use std::time::SystemTime;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cmdline {
    pub cmdline: String,
    pub executable: String,
    pub args: Vec<String>,
}

/// Read `/proc/<pid>/cmdline`, split on NUL, decode UTF-8.
pub fn cmdline(pid: i32) -> Option<Cmdline> {
    let bytes = fs::read(format!("/proc/{pid}/cmdline")).ok()?;
    if bytes.is_empty() {
        return None;
    }

    let parts: Vec<String> = bytes
        .split(|b| *b == 0)
        .filter(|s| !s.is_empty())
        .map(|s| String::from_utf8_lossy(s).into_owned())
        .collect();

    let executable = parts.first().cloned().unwrap_or_default();
    let args = parts.into_iter().skip(1).collect::<Vec<_>>();
    let cmdline = std::iter::once(executable.clone())
        .chain(args.iter().cloned())
        .collect::<Vec<_>>()
        .join(" ");

    Some(Cmdline {
        cmdline,
        executable,
        args,
    })
}

#[derive(Debug, Clone)]
pub struct Stat {
    pub pid: i32,
    pub comm: String,
    pub state: char,
    pub ppid: i32,
}

/// Parse `/proc/<pid>/stat`. `comm` may contain spaces/parens so we split on
/// the *last* `)` rather than whitespace.
pub fn stat(pid: i32) -> Option<Stat> {
    let content = fs::read_to_string(format!("/proc/{pid}/stat")).ok()?;

    let open = content.find('(')?;
    let close = content.rfind(')')?;
    let comm = content[open + 1..close].to_string();

    let rest: Vec<&str> = content[close + 1..].split_whitespace().collect();
    if rest.len() < 2 {
        return None;
    }

    let state = rest[0].chars().next().unwrap_or('?');
    let ppid = rest[1].parse().ok()?;

    Some(Stat {
        pid,
        comm,
        state,
        ppid,
    })
}

/// Resident set size in kilobytes, via `/proc/<pid>/statm` field 1 (resident
/// pages) times the page size.
pub fn rss_kb(pid: i32) -> Option<u64> {
    let content = fs::read_to_string(format!("/proc/{pid}/statm")).ok()?;
    let resident_pages: u64 = content.split_whitespace().nth(1)?.parse().ok()?;
    let page_size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) } as u64;
    Some(resident_pages * page_size / 1024)
}

/// All pids in `/proc` owned by the current uid. Entries that vanish during
/// enumeration (race with process exit) are silently skipped.
pub fn my_pids() -> Vec<i32> {
    let uid = unsafe { libc::getuid() };
    let mut pids = Vec::new();

    let Ok(entries) = fs::read_dir("/proc") else {
        return pids;
    };

    for entry in entries.flatten() {
        let Ok(pid) = entry.file_name().to_string_lossy().parse::<i32>() else {
            continue;
        };
        let Ok(meta) = entry.metadata() else {
            continue;
        };
        if meta.uid() == uid {
            pids.push(pid);
        }
    }

    pids
}

/// Direct children of `pid`, found by scanning `myPids()` for a matching
/// `ppid`. Bounded by the size of the candidate set so a transient cycle
/// cannot spin forever.
pub fn children(pid: i32) -> Vec<i32> {
    my_pids()
        .into_iter()
        .filter(|&candidate| stat(candidate).map(|s| s.ppid) == Some(pid))
        .collect()
}

/// Transitive closure of `children`, breadth-first, bounded by the candidate
/// pid count.
pub fn descendants(pid: i32) -> Vec<i32> {
    let bound = my_pids().len();
    let mut seen = Vec::new();
    let mut queue: VecDeque<i32> = VecDeque::from(children(pid));

    while let Some(next) = queue.pop_front() {
        if seen.contains(&next) {
            continue;
        }
        seen.push(next);
        if seen.len() >= bound {
            break;
        }
        queue.extend(children(next));
    }

    seen
}

pub fn exists(path: &str) -> bool {
    Path::new(path).exists()
}

pub fn mtime(path: &str) -> Option<SystemTime> {
    fs::metadata(path).ok()?.modified().ok()
}

pub fn pid_alive(pid: i32) -> bool {
    Path::new(&format!("/proc/{pid}")).exists()
}

/// `cmdline` that starts with `/bin/sh -c` is a shell wrapper, not the
/// program itself.
pub fn is_shell_wrapper(cmdline: &str) -> bool {
    cmdline.starts_with("/bin/sh -c")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_our_own_cmdline() {
        let pid = std::process::id() as i32;
        let result = cmdline(pid).expect("own cmdline should be readable");
        assert!(!result.executable.is_empty());
    }

    #[test]
    fn reads_our_own_stat() {
        let pid = std::process::id() as i32;
        let result = stat(pid).expect("own stat should be readable");
        assert_eq!(result.pid, pid);
    }

    #[test]
    fn rss_of_current_process_is_nonzero() {
        let pid = std::process::id() as i32;
        assert!(rss_kb(pid).unwrap_or(0) > 0);
    }

    #[test]
    fn unknown_pid_yields_none() {
        assert!(cmdline(i32::MAX).is_none());
        assert!(stat(i32::MAX).is_none());
        assert!(!pid_alive(i32::MAX));
    }

    #[test]
    fn detects_shell_wrapper_cmdlines() {
        assert!(is_shell_wrapper("/bin/sh -c sleep 60"));
        assert!(!is_shell_wrapper("/usr/bin/sleep 60"));
    }

    #[test]
    fn descendants_of_a_leaf_process_is_empty() {
        let pid = std::process::id() as i32;
        // This test process has no children at rest.
        assert!(children(pid).is_empty() || !descendants(pid).contains(&pid));
    }
}
