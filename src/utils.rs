// 该文件是 Qiuyuan （球员检测） 项目的一部分。
// src/utils.rs - URL 辅助函数
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

use std::path::PathBuf;

use thiserror::Error;
use url::Url;

#[derive(Error, Debug, PartialEq, Eq)]
#[error("查询参数 {key} 不是有效的开关值: {value}")]
pub struct InvalidFlag {
  pub key: String,
  pub value: String,
}

/// 取出 URL 中的文件系统路径，并进行百分号解码
pub fn url_to_path(url: &Url) -> PathBuf {
  let raw = url.path();
  match urlencoding::decode(raw) {
    Ok(decoded) => PathBuf::from(decoded.into_owned()),
    Err(_) => PathBuf::from(raw),
  }
}

/// 读取开关参数。缺省为关；`?key`、`?key=true`、`?key=1` 为开，
/// `false` 与 `0` 为关，其余取值报错
pub fn query_flag(url: &Url, key: &str) -> Result<bool, InvalidFlag> {
  match query_value(url, key).as_deref() {
    None | Some("false") | Some("0") => Ok(false),
    Some("") | Some("true") | Some("1") => Ok(true),
    Some(value) => Err(InvalidFlag {
      key: key.to_string(),
      value: value.to_string(),
    }),
  }
}

/// 读取查询参数中某个键的取值，多次出现时取第一个
pub fn query_value(url: &Url, key: &str) -> Option<String> {
  url
    .query_pairs()
    .find(|(k, _)| k == key)
    .map(|(_, v)| v.into_owned())
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn path_is_percent_decoded() {
    let url = Url::parse("image:///data/match%201/frame.png").unwrap();
    assert_eq!(url_to_path(&url), PathBuf::from("/data/match 1/frame.png"));
  }

  #[test]
  fn query_helpers() {
    let url = Url::parse("folder:///tmp/out?record=id&always").unwrap();
    assert_eq!(query_flag(&url, "always"), Ok(true));
    assert_eq!(query_flag(&url, "font"), Ok(false));
    assert_eq!(query_value(&url, "record").as_deref(), Some("id"));
    assert_eq!(query_value(&url, "font"), None);
  }

  #[test]
  fn flag_values() {
    let flag = |query: &str| {
      let url = Url::parse(&format!("folder:///tmp/out?{query}")).unwrap();
      query_flag(&url, "always")
    };
    assert_eq!(flag("always=true"), Ok(true));
    assert_eq!(flag("always=1"), Ok(true));
    assert_eq!(flag("always="), Ok(true));
    assert_eq!(flag("always=false"), Ok(false));
    assert_eq!(flag("always=0"), Ok(false));
    assert_eq!(
      flag("always=yes"),
      Err(InvalidFlag {
        key: "always".to_string(),
        value: "yes".to_string(),
      })
    );
  }
}
