//! Best-effort device hints from a user-agent string.
//!
//! Only the handful of families that matter for device attribution are
//! recognized. Anything else yields an empty [`DeviceInfo`]; parsing never
//! fails.

use serde::Serialize;

/// OS and hardware hints. Every field is optional.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DeviceInfo {
    pub os_name: Option<String>,
    pub os_version: Option<String>,
    pub device_manufacturer: Option<String>,
    pub device_model: Option<String>,
    pub platform: Option<String>,
}

impl DeviceInfo {
    pub fn is_empty(&self) -> bool {
        self.os_name.is_none()
            && self.os_version.is_none()
            && self.device_manufacturer.is_none()
            && self.device_model.is_none()
            && self.platform.is_none()
    }
}

pub fn parse_user_agent(ua: &str) -> DeviceInfo {
    let ua = ua.trim();
    if ua.is_empty() {
        return DeviceInfo::default();
    }

    if let Some(info) = parse_ios(ua) {
        return info;
    }
    if let Some(info) = parse_android(ua) {
        return info;
    }
    if let Some(version) = after(ua, "Windows NT ") {
        return DeviceInfo {
            os_name: Some("Windows".into()),
            os_version: windows_release(version).map(String::from),
            platform: Some("Web".into()),
            ..Default::default()
        };
    }
    if let Some(version) = after(ua, "Mac OS X ") {
        return DeviceInfo {
            os_name: Some("Mac OS X".into()),
            os_version: Some(underscored_version(version)),
            device_manufacturer: Some("Apple".into()),
            platform: Some("Web".into()),
            ..Default::default()
        };
    }
    if ua.contains("CrOS") {
        return DeviceInfo {
            os_name: Some("Chrome OS".into()),
            platform: Some("Web".into()),
            ..Default::default()
        };
    }
    if ua.contains("Linux") {
        return DeviceInfo {
            os_name: Some("Linux".into()),
            platform: Some("Web".into()),
            ..Default::default()
        };
    }

    DeviceInfo::default()
}

fn parse_ios(ua: &str) -> Option<DeviceInfo> {
    let model = if ua.contains("iPhone") {
        "iPhone"
    } else if ua.contains("iPad") {
        "iPad"
    } else if ua.contains("iPod") {
        "iPod"
    } else {
        return None;
    };

    // "CPU iPhone OS 17_2 like Mac OS X" / "CPU OS 16_6 like Mac OS X"
    let os_version = after(ua, " OS ")
        .filter(|v| v.starts_with(|c: char| c.is_ascii_digit()))
        .map(underscored_version);

    Some(DeviceInfo {
        os_name: Some("iOS".into()),
        os_version,
        device_manufacturer: Some("Apple".into()),
        device_model: Some(model.into()),
        platform: Some("Web".into()),
    })
}

fn parse_android(ua: &str) -> Option<DeviceInfo> {
    let rest = after(ua, "Android")?;
    let rest = rest.trim_start();
    let os_version = Some(version_token(rest))
        .filter(|v| !v.is_empty())
        .map(String::from);

    // "Linux; Android 14; Pixel 8 Build/..." -> the segment after the version
    let model = ua
        .split_once('(')
        .and_then(|(_, inner)| inner.split(')').next())
        .and_then(|inner| {
            inner
                .split(';')
                .map(str::trim)
                .skip_while(|part| !part.starts_with("Android"))
                .nth(1)
        })
        .map(|part| part.split(" Build/").next().unwrap_or(part).trim())
        .filter(|part| !part.is_empty() && *part != "K" && *part != "wv");

    let manufacturer = model.and_then(manufacturer_for_model);

    Some(DeviceInfo {
        os_name: Some("Android".into()),
        os_version,
        device_manufacturer: manufacturer.map(String::from),
        device_model: model.map(String::from),
        platform: Some("Web".into()),
    })
}

fn manufacturer_for_model(model: &str) -> Option<&'static str> {
    if model.starts_with("SM-") || model.starts_with("GT-") || model.contains("Galaxy") {
        Some("Samsung")
    } else if model.starts_with("Pixel") || model.starts_with("Nexus") {
        Some("Google")
    } else if model.starts_with("Redmi") || model.starts_with("Mi ") || model.starts_with("POCO") {
        Some("Xiaomi")
    } else if model.starts_with("moto") {
        Some("Motorola")
    } else {
        None
    }
}

/// Marketing name for an NT kernel version.
fn windows_release(rest: &str) -> Option<&'static str> {
    match version_token(rest) {
        "10.0" => Some("10"),
        "6.3" => Some("8.1"),
        "6.2" => Some("8"),
        "6.1" => Some("7"),
        "6.0" => Some("Vista"),
        "5.1" | "5.2" => Some("XP"),
        _ => None,
    }
}

fn after<'a>(haystack: &'a str, needle: &str) -> Option<&'a str> {
    haystack.find(needle).map(|i| &haystack[i + needle.len()..])
}

/// Leading run of digits, dots and underscores.
fn version_token(s: &str) -> &str {
    let end = s
        .find(|c: char| !(c.is_ascii_digit() || c == '.' || c == '_'))
        .unwrap_or(s.len());
    &s[..end]
}

fn underscored_version(s: &str) -> String {
    version_token(s).replace('_', ".")
}
