//! Locale-aware display normalization shared by every adapter.

use chrono::{DateTime, FixedOffset, Utc};

use crate::model::Locale;

const COMPASS_ZH: [&str; 8] = ["北", "东北", "东", "东南", "南", "西南", "西", "西北"];
const COMPASS_EN: [&str; 8] = ["N", "NE", "E", "SE", "S", "SW", "W", "NW"];

/// Exclusive upper bounds (km/h) of wind scale buckets 0..=8.
const SCALE_BREAKPOINTS_KMH: [f64; 9] = [1.0, 6.0, 12.0, 20.0, 29.0, 39.0, 50.0, 62.0, 75.0];

const CITY_MARKER: &str = "市";

/// Remove the trailing administrative marker ("北京市" → "北京").
///
/// English names keep their " City": "Mexico City" is not "Mexico".
///
/// Idempotent. Returns the trimmed input unchanged if stripping would leave
/// nothing.
pub fn strip_city_suffix(city: &str) -> String {
    let trimmed = city.trim();
    let mut rest = trimmed;

    while let Some(stripped) = rest.strip_suffix(CITY_MARKER) {
        rest = stripped.trim_end();
    }

    if rest.is_empty() { trimmed.to_string() } else { rest.to_string() }
}

/// Wind scale bucket 0..=9 for a speed in km/h; 9 stands for "9 and above".
///
/// Negative and NaN speeds land in bucket 0.
pub fn wind_scale(speed_kmh: f64) -> u8 {
    if speed_kmh.is_nan() {
        return 0;
    }
    SCALE_BREAKPOINTS_KMH
        .iter()
        .position(|limit| speed_kmh < *limit)
        .unwrap_or(SCALE_BREAKPOINTS_KMH.len()) as u8
}

/// Index 0..8 into the compass rose, `round(deg / 45) mod 8`.
pub fn compass_index(degrees: f64) -> usize {
    let normalized = degrees.rem_euclid(360.0);
    ((normalized / 45.0).round() as usize) % 8
}

/// Compass point for a bearing: "NE" in English, "东北" in Chinese.
pub fn compass_point(degrees: f64, locale: Locale) -> &'static str {
    let index = compass_index(degrees);
    match locale {
        Locale::Zh => COMPASS_ZH[index],
        Locale::En => COMPASS_EN[index],
    }
}

/// Wind direction label as it is shown to the user ("东北风" / "NE").
pub fn wind_direction(degrees: f64, locale: Locale) -> String {
    let point = compass_point(degrees, locale);
    match locale {
        Locale::Zh => format!("{point}风"),
        Locale::En => point.to_string(),
    }
}

/// Translate a compass label reported as text ("NE", "东北") into `locale`.
pub fn translate_compass(label: &str, locale: Locale) -> Option<&'static str> {
    let label = label.trim().trim_end_matches('风');
    let index = COMPASS_EN
        .iter()
        .position(|p| p.eq_ignore_ascii_case(label))
        .or_else(|| COMPASS_ZH.iter().position(|p| *p == label))?;

    Some(match locale {
        Locale::Zh => COMPASS_ZH[index],
        Locale::En => COMPASS_EN[index],
    })
}

/// Render a scale level: "3级", "9级+", "Level 3".
pub fn scale_label(level: &str, locale: Locale) -> String {
    match locale {
        Locale::Zh => format!("{level}级"),
        Locale::En => format!("Level {level}"),
    }
}

/// Wind speed for display: a scale bucket for Chinese, raw km/h for English.
pub fn wind_speed(speed_kmh: f64, locale: Locale) -> String {
    match locale {
        Locale::Zh => match wind_scale(speed_kmh) {
            9 => "9级+".to_string(),
            n => scale_label(&n.to_string(), locale),
        },
        Locale::En => format!("{speed_kmh} km/h"),
    }
}

/// Full wind description from bearing and speed ("东北风 3级", "NE 14 km/h").
pub fn describe_wind(degrees: f64, speed_kmh: f64, locale: Locale) -> String {
    format!("{} {}", wind_direction(degrees, locale), wind_speed(speed_kmh, locale))
}

/// `HH:MM` (24-hour) for `at` in the display offset.
pub fn display_time(at: DateTime<Utc>, offset: FixedOffset) -> String {
    at.with_timezone(&offset).format("%H:%M").to_string()
}

/// WMO weather interpretation code (Open-Meteo) → display text.
pub fn wmo_condition(code: i64, locale: Locale) -> &'static str {
    let (zh, en) = match code {
        0 => ("晴", "Clear"),
        1 => ("晴间多云", "Partly Cloudy"),
        2 => ("多云", "Cloudy"),
        3 => ("阴", "Overcast"),
        45 => ("雾", "Fog"),
        48 => ("白霜", "Rime Fog"),
        51 | 53 | 55 => ("毛毛雨", "Light Drizzle"),
        56 | 57 => ("冻毛毛雨", "Freezing Drizzle"),
        61 => ("小雨", "Slight Rain"),
        63 => ("中雨", "Moderate Rain"),
        65 => ("大雨", "Heavy Rain"),
        66 | 67 => ("冻雨", "Freezing Rain"),
        71 => ("小雪", "Slight Snow"),
        73 => ("中雪", "Moderate Snow"),
        75 => ("大雪", "Heavy Snow"),
        77 => ("雪粒", "Snow Grains"),
        80..=82 => ("阵雨", "Showers"),
        85 | 86 => ("阵雪", "Snow Showers"),
        95 => ("雷阵雨", "Thunderstorm"),
        96 | 99 => ("雷阵雨伴有冰雹", "Thunderstorm with Hail"),
        _ => return locale.unknown(),
    };
    match locale {
        Locale::Zh => zh,
        Locale::En => en,
    }
}

/// 7Timer `civil` weather keyword → display text. Day/night suffixes are ignored.
pub fn seven_timer_condition(keyword: &str, locale: Locale) -> &'static str {
    let key = keyword.trim().to_lowercase();
    let key = key
        .strip_suffix("day")
        .or_else(|| key.strip_suffix("night"))
        .unwrap_or(&key);

    let (zh, en) = match key {
        "clear" => ("晴", "Clear"),
        "pcloudy" => ("晴间多云", "Partly Cloudy"),
        "mcloudy" => ("多云", "Partly Cloudy"),
        "cloudy" => ("阴", "Cloudy"),
        "humid" => ("雾", "Foggy"),
        "lightrain" => ("小雨", "Light Rain"),
        "oshower" | "ishower" => ("阵雨", "Showers"),
        "lightsnow" => ("小雪", "Light Snow"),
        "rain" => ("雨", "Rain"),
        "snow" => ("雪", "Snow"),
        "rainsnow" => ("雨夹雪", "Sleet"),
        "ts" | "tsrain" => ("雷暴", "Thunderstorm"),
        _ => return locale.unknown(),
    };
    match locale {
        Locale::Zh => zh,
        Locale::En => en,
    }
}

/// Amap and Vore report condition text in Chinese only; translate the common ones.
pub fn chinese_condition(text: &str, locale: Locale) -> String {
    let text = text.trim();
    if text.is_empty() {
        return locale.unknown().to_string();
    }
    if locale == Locale::Zh {
        return text.to_string();
    }

    let en = match text {
        "晴" => "Clear",
        "少云" | "晴间多云" => "Partly Cloudy",
        "多云" => "Cloudy",
        "阴" => "Overcast",
        "阵雨" => "Showers",
        "雷阵雨" => "Thunderstorm",
        "雷阵雨并伴有冰雹" => "Thunderstorm with Hail",
        "雨夹雪" => "Sleet",
        "小雨" => "Light Rain",
        "中雨" => "Moderate Rain",
        "大雨" => "Heavy Rain",
        "暴雨" | "大暴雨" | "特大暴雨" => "Rainstorm",
        "小雪" => "Light Snow",
        "中雪" => "Moderate Snow",
        "大雪" => "Heavy Snow",
        "暴雪" => "Blizzard",
        "雾" | "浓雾" | "大雾" => "Fog",
        "霾" | "中度霾" | "重度霾" => "Haze",
        "扬沙" | "浮尘" | "沙尘暴" => "Dust",
        "风" | "有风" | "大风" => "Windy",
        _ => locale.unknown(),
    };
    en.to_string()
}
