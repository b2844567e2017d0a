//! Detection of a previous, interrupted run in a job's work directory.
//!
//! This trusts directory contents: any generated frame tagged with the model
//! name marks the directory as a usable prior run, and every untagged frame
//! with the right extension is taken to be an original.

use anyhow::{Context, Result};
use std::cmp::Ordering;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::config::ImageExtension;

fn frame_names(work_dir: &Path, ext: ImageExtension) -> Result<Vec<String>> {
    let mut names = Vec::new();
    for entry in WalkDir::new(work_dir).min_depth(1).max_depth(1) {
        let entry = entry.with_context(|| format!("listing {}", work_dir.display()))?;
        if !entry.file_type().is_file() {
            continue;
        }
        if let Some(name) = entry.file_name().to_str() {
            if name.ends_with(ext.as_str()) {
                names.push(name.to_string());
            }
        }
    }
    Ok(names)
}

/// True when `work_dir` holds more than one frame generated by `model`.
pub fn can_resume(work_dir: &Path, model: &str, ext: ImageExtension) -> bool {
    if !work_dir.is_dir() {
        return false;
    }
    match frame_names(work_dir, ext) {
        Ok(names) => names.iter().filter(|n| n.contains(model)).count() > 1,
        Err(_) => false,
    }
}

/// Original frames left in `work_dir`, in natural order.
pub fn recover_originals(work_dir: &Path, model: &str, ext: ImageExtension) -> Result<Vec<PathBuf>> {
    let mut originals: Vec<String> = frame_names(work_dir, ext)?
        .into_iter()
        .filter(|n| !n.contains(model))
        .collect();
    originals.sort_by(|a, b| natural_cmp(a, b));
    Ok(originals.into_iter().map(|n| work_dir.join(n)).collect())
}

/// Orders digit runs by value, so `frame_999` sorts before `frame_1000`.
pub fn natural_cmp(a: &str, b: &str) -> Ordering {
    let mut a = a.chars().peekable();
    let mut b = b.chars().peekable();
    loop {
        match (a.peek().copied(), b.peek().copied()) {
            (None, None) => return Ordering::Equal,
            (None, Some(_)) => return Ordering::Less,
            (Some(_), None) => return Ordering::Greater,
            (Some(x), Some(y)) if x.is_ascii_digit() && y.is_ascii_digit() => {
                let run_a = take_digits(&mut a);
                let run_b = take_digits(&mut b);
                let ord = compare_digit_runs(&run_a, &run_b);
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            (Some(x), Some(y)) => {
                if x != y {
                    return x.cmp(&y);
                }
                a.next();
                b.next();
            }
        }
    }
}

fn take_digits(chars: &mut std::iter::Peekable<std::str::Chars<'_>>) -> String {
    let mut run = String::new();
    while let Some(c) = chars.peek().copied().filter(char::is_ascii_digit) {
        run.push(c);
        chars.next();
    }
    run
}

fn compare_digit_runs(a: &str, b: &str) -> Ordering {
    let a_trim = a.trim_start_matches('0');
    let b_trim = b.trim_start_matches('0');
    a_trim
        .len()
        .cmp(&b_trim.len())
        .then_with(|| a_trim.cmp(b_trim))
        .then_with(|| a.len().cmp(&b.len()))
}
