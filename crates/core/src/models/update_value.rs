//! 精确的PATCH语义
//!
//! 区分"设置为某值"、"清空"和"不修改"三种更新操作。

use serde::{Deserialize, Serialize};
use std::fmt;

/// 三态更新值
///
/// 反序列化时：字段缺失为 `NoChange`（需配合 `#[serde(default)]`），
/// 显式 `null` 为 `Unset`，其他值为 `Set`。
#[derive(Debug, Clone, PartialEq, Serialize, Default)]
#[serde(untagged)]
pub enum UpdateValue<T> {
    Set(T),
    Unset,
    #[default]
    NoChange,
}

impl<T> UpdateValue<T> {
    pub fn is_change(&self) -> bool {
        !matches!(self, UpdateValue::NoChange)
    }

    pub fn is_unset(&self) -> bool {
        matches!(self, UpdateValue::Unset)
    }

    pub fn value(&self) -> Option<&T> {
        match self {
            UpdateValue::Set(value) => Some(value),
            _ => None,
        }
    }

    /// 应用到已有的可空值
    pub fn apply_to(self, existing: Option<T>) -> Option<T> {
        match self {
            UpdateValue::Set(value) => Some(value),
            UpdateValue::Unset => None,
            UpdateValue::NoChange => existing,
        }
    }

    /// 应用到非空字段，`Unset` 视为不修改
    pub fn apply_required(self, existing: T) -> T {
        match self {
            UpdateValue::Set(value) => value,
            UpdateValue::Unset | UpdateValue::NoChange => existing,
        }
    }

    pub fn map<U, F>(self, f: F) -> UpdateValue<U>
    where
        F: FnOnce(T) -> U,
    {
        match self {
            UpdateValue::Set(value) => UpdateValue::Set(f(value)),
            UpdateValue::Unset => UpdateValue::Unset,
            UpdateValue::NoChange => UpdateValue::NoChange,
        }
    }
}

impl<'de, T> Deserialize<'de> for UpdateValue<T>
where
    T: Deserialize<'de>,
{
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        // 字段缺失时不会进入这里，由 serde(default) 给出 NoChange
        match Option::<T>::deserialize(deserializer)? {
            Some(value) => Ok(UpdateValue::Set(value)),
            None => Ok(UpdateValue::Unset),
        }
    }
}

impl<T> fmt::Display for UpdateValue<T>
where
    T: fmt::Display,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UpdateValue::Set(value) => write!(f, "Set({value})"),
            UpdateValue::Unset => write!(f, "Unset"),
            UpdateValue::NoChange => write!(f, "NoChange"),
        }
    }
}
