// 该文件是 Qiuyuan （球员检测） 项目的一部分。
// src/input/directory.rs - 目录帧序列输入
//
// 本文件根据 Apache 许可证第 2.0 版（以下简称“许可证”）授权使用；
// 除非遵守该许可证条款，否则您不得使用本文件。
// 您可通过以下网址获取许可证副本：
// http://www.apache.org/licenses/LICENSE-2.0
// 除非适用法律要求或书面同意，根据本许可协议分发的软件均按“原样”提供，
// 不附带任何形式的明示或暗示的保证或条件。
// 有关许可权限与限制的具体条款，请参阅本许可协议。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, Wareless Group

use std::path::{Path, PathBuf};

use image::ImageReader;
use thiserror::Error;
use tracing::{debug, error, info};
use url::Url;

use crate::{FromUrl, FromUrlWithScheme, frame::RgbFrame, utils::url_to_path};

const IMAGE_EXTENSIONS: [&str; 5] = ["jpg", "jpeg", "png", "bmp", "webp"];

#[derive(Error, Debug)]
pub enum DirectoryInputError {
  #[error("URI schema mismatch")]
  SchemaMismatch,
  #[error("I/O error: {0}")]
  IoError(#[from] std::io::Error),
}

/// 按文件名顺序逐帧读取目录中的图片，例如从比赛录像中抽出的帧
pub struct DirectoryInput {
  files: std::vec::IntoIter<PathBuf>,
}

impl FromUrlWithScheme for DirectoryInput {
  const SCHEME: &'static str = "folder";
}

impl FromUrl for DirectoryInput {
  type Error = DirectoryInputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(DirectoryInputError::SchemaMismatch);
    }

    Self::open(url_to_path(url))
  }
}

fn is_image_file(path: &Path) -> bool {
  path.is_file()
    && path
      .extension()
      .and_then(|ext| ext.to_str())
      .map(|ext| IMAGE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
      .unwrap_or(false)
}

impl DirectoryInput {
  pub fn open(directory: impl AsRef<Path>) -> Result<Self, DirectoryInputError> {
    let directory = directory.as_ref();
    let mut files = std::fs::read_dir(directory)?
      .map(|entry| entry.map(|e| e.path()))
      .collect::<Result<Vec<_>, _>>()?;
    files.retain(|path| is_image_file(path));
    files.sort();

    info!("目录 {} 中共有 {} 帧图像", directory.display(), files.len());

    Ok(DirectoryInput {
      files: files.into_iter(),
    })
  }

  pub fn remaining(&self) -> usize {
    self.files.len()
  }
}

impl Iterator for DirectoryInput {
  type Item = RgbFrame;

  fn next(&mut self) -> Option<Self::Item> {
    for path in self.files.by_ref() {
      debug!("读取图像: {}", path.display());
      let image = ImageReader::open(&path)
        .map_err(image::ImageError::IoError)
        .and_then(|reader| reader.with_guessed_format().map_err(image::ImageError::IoError))
        .and_then(|reader| reader.decode());
      match image {
        Ok(image) => return Some(RgbFrame::from(image.into_rgb8())),
        Err(e) => error!("无法读取图像 {}: {}，跳过", path.display(), e),
      }
    }
    None
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use image::RgbImage;

  #[test]
  fn lists_images_sorted_and_skips_broken_files() {
    let dir = tempfile::tempdir().unwrap();
    RgbImage::new(3, 1).save(dir.path().join("0002.png")).unwrap();
    RgbImage::new(1, 1).save(dir.path().join("0000.png")).unwrap();
    std::fs::write(dir.path().join("0001.jpg"), b"not an image").unwrap();
    std::fs::write(dir.path().join("notes.txt"), b"ignored").unwrap();
    std::fs::create_dir(dir.path().join("nested.png")).unwrap();

    let input = DirectoryInput::open(dir.path()).unwrap();
    assert_eq!(input.remaining(), 3);

    let widths: Vec<u32> = input.map(|frame| frame.width()).collect();
    assert_eq!(widths, vec![1, 3]);
  }

  #[test]
  fn missing_directory_is_io_error() {
    assert!(matches!(
      DirectoryInput::open("/definitely/not/here"),
      Err(DirectoryInputError::IoError(_))
    ));
  }
}
