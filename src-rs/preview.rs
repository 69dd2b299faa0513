use anyhow::{bail, Context, Result};
use image::{DynamicImage, RgbImage};
use rand::Rng;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::Duration;
use wait_timeout::ChildExt;

use crate::{default_sidecar_for, ensure_parent_dir, slugify, timestamp_compact, write_json_pretty};

const VIEWER_GRACE: Duration = Duration::from_secs(3);

pub struct PreviewFiles {
    pub image_path: PathBuf,
    pub sidecar_path: PathBuf,
}

pub fn preview_path(out_root: &Path, config_name: &str) -> PathBuf {
    let rand = rand::thread_rng().gen_range(1000..9999);
    out_root.join("previews").join(format!(
        "quantized-{}-{}-{}-{rand}.png",
        slugify(config_name),
        timestamp_compact(),
        std::process::id()
    ))
}

pub fn write_preview(
    image: &RgbImage,
    image_path: &Path,
    report: &Value,
) -> Result<PreviewFiles> {
    ensure_parent_dir(image_path)?;
    DynamicImage::ImageRgb8(image.clone())
        .save(image_path)
        .with_context(|| format!("failed to save preview image: {}", image_path.display()))?;
    let sidecar_path = default_sidecar_for(image_path);
    write_json_pretty(&sidecar_path, report)?;
    Ok(PreviewFiles {
        image_path: image_path.to_path_buf(),
        sidecar_path,
    })
}

fn viewer_command(path: &Path) -> Command {
    if cfg!(target_os = "macos") {
        let mut cmd = Command::new("open");
        cmd.arg(path);
        cmd
    } else if cfg!(target_os = "windows") {
        let mut cmd = Command::new("cmd");
        cmd.args(["/C", "start", ""]).arg(path);
        cmd
    } else {
        let mut cmd = Command::new("xdg-open");
        cmd.arg(path);
        cmd
    }
}

/// Hands the file to the desktop's default viewer. A launcher still running
/// after the grace period is left alone.
pub fn open_in_viewer(path: &Path) -> Result<()> {
    let mut child = viewer_command(path)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .with_context(|| format!("failed to launch image viewer for {}", path.display()))?;

    match child.wait_timeout(VIEWER_GRACE).map_err(anyhow::Error::from)? {
        Some(status) if !status.success() => {
            bail!("image viewer exited with {status} for {}", path.display())
        }
        Some(_) => Ok(()),
        None => {
            tracing::debug!(path = %path.display(), "viewer still running, not waiting");
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;
    use serde_json::json;
    use tempfile::tempdir;

    #[test]
    fn preview_names_carry_config_slug() {
        let path = preview_path(Path::new("/tmp/out"), "My Paint App");
        let name = path.file_name().unwrap().to_str().unwrap();
        assert!(name.starts_with("quantized-my-paint-app-"));
        assert!(name.ends_with(".png"));
        assert_eq!(path.parent().unwrap(), Path::new("/tmp/out/previews"));
    }

    #[test]
    fn writes_image_and_sidecar() {
        let dir = tempdir().unwrap();
        let target = dir.path().join("previews").join("q.png");
        let img = RgbImage::from_pixel(3, 2, Rgb([9, 8, 7]));
        let files = write_preview(&img, &target, &json!({"stride": 2})).unwrap();

        assert_eq!(files.sidecar_path, dir.path().join("previews").join("q.json"));
        let reloaded = image::open(&files.image_path).unwrap().to_rgb8();
        assert_eq!(reloaded.dimensions(), (3, 2));
        assert_eq!(*reloaded.get_pixel(2, 1), Rgb([9, 8, 7]));
        let sidecar: Value =
            serde_json::from_str(&std::fs::read_to_string(files.sidecar_path).unwrap()).unwrap();
        assert_eq!(sidecar["stride"], json!(2));
    }
}
