//! Process tree discovery via /proc

use std::collections::{HashMap, HashSet, VecDeque};
use std::fs;

use crate::error::{MonitorError, Result};

/// Parent pid from the contents of `/proc/<pid>/stat`.
///
/// The command name is wrapped in parentheses and may itself contain spaces
/// or parentheses, so fields are read after the last `)`.
pub fn parse_ppid(stat: &str) -> Option<i32> {
    let rest = &stat[stat.rfind(')')? + 1..];
    let mut fields = rest.split_whitespace();
    let _state = fields.next()?;
    fields.next()?.parse().ok()
}

/// Map of parent pid to child pids for every process visible in /proc
pub fn children_map() -> Result<HashMap<i32, Vec<i32>>> {
    let entries = fs::read_dir("/proc").map_err(|e| {
        MonitorError::ProcessMonitoring(format!("Failed to read /proc: {}", e))
    })?;

    let mut children: HashMap<i32, Vec<i32>> = HashMap::new();
    for entry in entries.flatten() {
        let Some(pid) = entry.file_name().to_str().and_then(|n| n.parse::<i32>().ok()) else {
            continue;
        };
        // processes can exit while we scan
        let Ok(stat) = fs::read_to_string(entry.path().join("stat")) else {
            continue;
        };
        if let Some(ppid) = parse_ppid(&stat) {
            children.entry(ppid).or_default().push(pid);
        }
    }
    Ok(children)
}

/// Every descendant of `roots` (roots excluded), parents before children
pub fn descendants_in(children: &HashMap<i32, Vec<i32>>, roots: &[i32]) -> Vec<i32> {
    let mut seen: HashSet<i32> = roots.iter().copied().collect();
    let mut queue: VecDeque<i32> = roots.iter().copied().collect();
    let mut found = Vec::new();

    while let Some(pid) = queue.pop_front() {
        for &child in children.get(&pid).map(Vec::as_slice).unwrap_or_default() {
            if seen.insert(child) {
                found.push(child);
                queue.push_back(child);
            }
        }
    }
    found
}

pub fn descendants(roots: &[i32]) -> Result<Vec<i32>> {
    Ok(descendants_in(&children_map()?, roots))
}
