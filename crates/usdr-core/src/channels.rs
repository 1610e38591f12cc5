//! Channel descriptors.
//!
//! A [`ChannelInfo`] names the logical channels a stream carries, either by
//! count alone, by physical channel number, or by channel name.

use crate::error::{Error, Result};

/// Which logical channels a stream should carry.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ChannelInfo {
    count: usize,
    numbers: Option<Vec<u32>>,
    names: Option<Vec<String>>,
}

impl ChannelInfo {
    /// `count` channels with the device's default mapping.
    pub fn with_count(count: usize) -> Self {
        ChannelInfo {
            count,
            numbers: None,
            names: None,
        }
    }

    /// One channel per set bit of `mask`, numbered by bit position.
    pub fn from_mask(mask: u64) -> Self {
        let numbers: Vec<u32> = (0..64u32).filter(|&bit| mask & (1u64 << bit) != 0).collect();
        ChannelInfo {
            count: numbers.len(),
            numbers: Some(numbers),
            names: None,
        }
    }

    pub fn from_numbers(numbers: Vec<u32>) -> Self {
        ChannelInfo {
            count: numbers.len(),
            numbers: Some(numbers),
            names: None,
        }
    }

    pub fn from_names<S: Into<String>>(names: impl IntoIterator<Item = S>) -> Self {
        let names: Vec<String> = names.into_iter().map(Into::into).collect();
        ChannelInfo {
            count: names.len(),
            numbers: None,
            names: Some(names),
        }
    }

    /// Parse a channel list such as `"0:1"`, `"0_2"` or `"a/b"`.
    ///
    /// Tokens are split on `:`, `_`, `-` and `/`. Numeric tokens select
    /// physical channel numbers, alphabetic tokens select channel names;
    /// mixing both kinds is rejected.
    pub fn parse(list: &str) -> Result<Self> {
        let mut numbers = Vec::new();
        let mut names = Vec::new();

        for (idx, token) in list
            .split([':', '_', '-', '/'])
            .filter(|t| !t.is_empty())
            .enumerate()
        {
            let first = token.chars().next().unwrap_or_default();
            if first.is_ascii_digit() {
                let n = token.parse::<u32>().map_err(|_| {
                    Error::InvalidArgument(format!("channel token #{idx} '{token}'"))
                })?;
                numbers.push(n);
            } else if first.is_ascii_alphabetic() {
                names.push(token.to_string());
            } else {
                return Err(Error::InvalidArgument(format!(
                    "channel token #{idx} '{token}'"
                )));
            }
        }

        match (numbers.is_empty(), names.is_empty()) {
            (false, false) => Err(Error::InvalidArgument(format!(
                "channel list '{list}' mixes numbers and names"
            ))),
            (false, true) => Ok(ChannelInfo::from_numbers(numbers)),
            (true, false) => Ok(ChannelInfo::from_names(names)),
            (true, true) => Ok(ChannelInfo::with_count(0)),
        }
    }

    pub fn count(&self) -> usize {
        self.count
    }

    pub fn numbers(&self) -> Option<&[u32]> {
        self.numbers.as_deref()
    }

    pub fn names(&self) -> Option<&[String]> {
        self.names.as_deref()
    }

    /// The descriptor handed to each of `devices` physical devices when one
    /// request is split evenly across an array.
    ///
    /// Every device receives `count / devices` channels, mapped onto the
    /// leading entries of the number or name list since each board numbers
    /// its own channels from zero.
    pub fn split(&self, devices: usize) -> Result<ChannelInfo> {
        if devices == 0 {
            return Err(Error::InvalidArgument("split across zero devices".into()));
        }
        let per_device = self.count / devices;
        if per_device == 0 {
            return Err(Error::InvalidArgument(format!(
                "{} channels cannot be split across {devices} devices",
                self.count
            )));
        }

        Ok(ChannelInfo {
            count: per_device,
            numbers: self
                .numbers
                .as_ref()
                .map(|n| n.iter().take(per_device).copied().collect()),
            names: self
                .names
                .as_ref()
                .map(|n| n.iter().take(per_device).cloned().collect()),
        })
    }
}
