use std::collections::VecDeque;
use std::fs;
use std::path::{Path, PathBuf};

use log::{debug, error};

use crate::gallery::archive::{SevenZip, Target};
use crate::gallery::config::ScanningConfig;
use crate::gallery::matching::{self, VarContext};

/// Classifies the operator-supplied paths into targets.
///
/// A path that is an archive file or a loose image becomes a target
/// directly; directories are scanned breadth-first within the configured
/// depth bound.
pub fn discover_targets(
    inputs: &[PathBuf],
    scanning: &ScanningConfig,
    backend: &SevenZip,
) -> Vec<Target> {
    let mut targets = Vec::new();
    for input in inputs {
        let metadata = match fs::symlink_metadata(input) {
            Ok(metadata) => metadata,
            Err(e) => {
                error!("Invalid file: {}", input.display());
                debug!("{e}");
                continue;
            }
        };

        if metadata.is_dir() {
            scan_directory(input, scanning, backend, &mut targets);
        } else if metadata.is_file() {
            if matching::file_has_extension(input, &scanning.archive_file_extensions) {
                targets.push(Target::archive_file(input.clone(), backend.clone()));
            } else if matching::file_has_extension(input, &scanning.image_file_extensions) {
                // A single loose image stands in for its folder; the file
                // list is known to be incomplete.
                let dir = input.parent().unwrap_or(Path::new("")).to_path_buf();
                let name = input
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default();
                targets.push(Target::folder(dir, vec![name], true, backend.clone()));
            }
        }
    }
    targets
}

struct PendingDirectory {
    path: PathBuf,
    depth: u32,
}

fn scan_directory(
    root: &Path,
    scanning: &ScanningConfig,
    backend: &SevenZip,
    targets: &mut Vec<Target>,
) {
    let vars = VarContext::new();
    let mut queue = VecDeque::new();
    queue.push_back(PendingDirectory {
        path: root.to_path_buf(),
        depth: 0,
    });

    while let Some(pending) = queue.pop_front() {
        if pending.depth >= scanning.scan_folders_recursive_depth {
            continue;
        }

        let (mut files, mut directories) = files_and_directories(&pending.path);
        files.retain(|f| !ignored(f, &scanning.ignore_files, &vars));
        directories.retain(|d| !ignored(d, &scanning.ignore_directories, &vars));

        // Files that keep the directory eligible as one folder target, and
        // the subset of them that are actually images.
        let mut folder_files = Vec::new();
        let mut image_count = 0usize;

        for file in &files {
            if scanning.scan_folders_for_archives
                && matching::file_has_extension(file, &scanning.archive_file_extensions)
            {
                targets.push(Target::archive_file(file.clone(), backend.clone()));
            }

            if matching::file_has_extension(file, &scanning.image_file_extensions) {
                folder_files.push(file.clone());
                image_count += 1;
            } else if matching::file_has_extension(
                file,
                &scanning.archive_folder_permitted_extensions,
            ) {
                folder_files.push(file.clone());
            }
        }

        let qualifies = scanning.scan_folders_for_images
            && image_count > 0
            && folder_files.len() == files.len();

        if qualifies {
            let names = folder_files
                .iter()
                .map(|f| {
                    f.strip_prefix(&pending.path)
                        .unwrap_or(f.as_path())
                        .to_string_lossy()
                        .into_owned()
                })
                .collect();
            targets.push(Target::folder(
                pending.path.clone(),
                names,
                false,
                backend.clone(),
            ));
        }

        if !qualifies || scanning.archive_folder_permit_nested_directories {
            let next_depth = pending.depth + 1;
            for directory in directories {
                queue.push_back(PendingDirectory {
                    path: directory,
                    depth: next_depth,
                });
            }
        }
    }
}

fn ignored(path: &Path, rules: &[String], vars: &VarContext) -> bool {
    let base = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    matching::matches_list(&base, false, rules, vars)
}

/// Immediate plain files and subdirectories of `dir`, sorted by name;
/// unreadable directories list as empty.
fn files_and_directories(dir: &Path) -> (Vec<PathBuf>, Vec<PathBuf>) {
    let mut files = Vec::new();
    let mut directories = Vec::new();
    let Ok(entries) = fs::read_dir(dir) else {
        return (files, directories);
    };
    for entry in entries.flatten() {
        let Ok(file_type) = entry.file_type() else {
            continue;
        };
        if file_type.is_dir() {
            directories.push(entry.path());
        } else if file_type.is_file() {
            files.push(entry.path());
        }
    }
    files.sort();
    directories.sort();
    (files, directories)
}
