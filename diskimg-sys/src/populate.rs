// SPDX-License-Identifier: GPL-3.0-only

use std::path::Path;

use diskimg_types::ContentSource;

/// Command that copies `content` into `mount_point`, ownership and modes preserved.
/// `None` for empty content.
pub fn command(content: &ContentSource, mount_point: &Path) -> Option<(&'static str, Vec<String>)> {
    let target = mount_point.display().to_string();
    match content {
        ContentSource::Directory(source) => Some((
            "cp",
            vec![
                "-a".to_string(),
                format!("{}/.", source.display()),
                target,
            ],
        )),
        ContentSource::Tar(archive) => Some(("tar", tar_args("-xf", archive, target))),
        ContentSource::TarGz(archive) => Some(("tar", tar_args("-xzf", archive, target))),
        ContentSource::None => None,
    }
}

fn tar_args(mode: &str, archive: &Path, target: String) -> Vec<String> {
    vec![
        "--same-owner".to_string(),
        "-p".to_string(),
        mode.to_string(),
        archive.display().to_string(),
        "-C".to_string(),
        target,
    ]
}
