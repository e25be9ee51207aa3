//! Number format rendering
//!
//! Renders a raw numeric cell value against an Excel number format code.
//! Covers what shows up in real workbooks: date/time codes (including
//! elapsed `[h]`), fixed and grouped decimals, percent, scientific,
//! fractions, literal text and bracketed color/locale/currency prefixes.
//! Locale-specific codes resolve to their en-US rendering.

use crate::error::{Result, XlsxError};
use chrono::{Datelike, Days, NaiveDate};

/// Epoch used to turn serial day numbers into calendar dates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum DateSystem {
    /// Day 1 is 1900-01-01, with the fictitious 1900-02-29 as day 60
    #[default]
    V1900,
    /// Day 0 is 1904-01-01 (`workbookPr date1904="1"`)
    V1904,
}

const MONTH_NAMES: [&str; 12] = [
    "January",
    "February",
    "March",
    "April",
    "May",
    "June",
    "July",
    "August",
    "September",
    "October",
    "November",
    "December",
];

const DAY_NAMES: [&str; 7] = [
    "Sunday",
    "Monday",
    "Tuesday",
    "Wednesday",
    "Thursday",
    "Friday",
    "Saturday",
];

/// Format code of a built-in number format id
pub fn builtin_format_code(id: u32) -> Option<&'static str> {
    let code = match id {
        0 => "General",
        1 => "0",
        2 => "0.00",
        3 => "#,##0",
        4 => "#,##0.00",
        5 => "\"$\"#,##0_);\\(\"$\"#,##0\\)",
        6 => "\"$\"#,##0_);[Red]\\(\"$\"#,##0\\)",
        7 => "\"$\"#,##0.00_);\\(\"$\"#,##0.00\\)",
        8 => "\"$\"#,##0.00_);[Red]\\(\"$\"#,##0.00\\)",
        9 => "0%",
        10 => "0.00%",
        11 => "0.00E+00",
        12 => "# ?/?",
        13 => "# ??/??",
        14 => "m/d/yy",
        15 => "d-mmm-yy",
        16 => "d-mmm",
        17 => "mmm-yy",
        18 => "h:mm AM/PM",
        19 => "h:mm:ss AM/PM",
        20 => "h:mm",
        21 => "h:mm:ss",
        22 => "m/d/yy h:mm",
        37 => "#,##0 ;(#,##0)",
        38 => "#,##0 ;[Red](#,##0)",
        39 => "#,##0.00;(#,##0.00)",
        40 => "#,##0.00;[Red](#,##0.00)",
        45 => "mm:ss",
        46 => "[h]:mm:ss",
        47 => "mmss.0",
        48 => "##0.0E+0",
        49 => "@",
        _ => return None,
    };
    Some(code)
}

/// Whether the code is the General format
pub fn is_general(code: &str) -> bool {
    code.trim().eq_ignore_ascii_case("general")
}

/// Whether the first section of a format code renders dates or times
pub fn is_date_format(code: &str) -> bool {
    split_sections(code)
        .first()
        .map(|section| is_date_section(&tokenize(section)))
        .unwrap_or(false)
}

/// Render `value` with `code`
///
/// Fails for values the code cannot represent (negative or non-finite
/// dates, NaN); callers degrade those to an empty string.
pub fn format_number(code: &str, value: f64, date_system: DateSystem) -> Result<String> {
    if !value.is_finite() {
        return Err(XlsxError::InvalidFormat(format!(
            "cannot render {} with '{}'",
            value, code
        )));
    }

    let sections = split_sections(code);
    let (section, value, show_minus) = match sections.len() {
        0 => return Ok(format_general(value)),
        1 => (sections[0].as_str(), value, true),
        2 => {
            if value < 0.0 {
                (sections[1].as_str(), value.abs(), false)
            } else {
                (sections[0].as_str(), value, true)
            }
        }
        _ => {
            if value < 0.0 {
                (sections[1].as_str(), value.abs(), false)
            } else if value == 0.0 {
                (sections[2].as_str(), value, true)
            } else {
                (sections[0].as_str(), value, true)
            }
        }
    };

    let tokens = tokenize(section);
    if is_date_section(&tokens) {
        render_date(&tokens, value, date_system)
    } else {
        render_number(&tokens, value, show_minus)
    }
}

/// Excel's General rendering: integers plainly, at most ten decimals,
/// scientific outside `1e-9..1e11`
pub fn format_general(value: f64) -> String {
    if value == 0.0 {
        return "0".to_string();
    }

    let abs = value.abs();
    if value.fract() == 0.0 && abs < 1e15 {
        let mut buffer = itoa::Buffer::new();
        return buffer.format(value as i64).to_string();
    }

    if !(1e-9..1e11).contains(&abs) {
        let formatted = format!("{:.5E}", value);
        let (mantissa, exponent) = formatted
            .split_once('E')
            .unwrap_or((formatted.as_str(), "0"));
        let mantissa = trim_fraction(mantissa);
        let exponent: i32 = exponent.parse().unwrap_or(0);
        let sign = if exponent < 0 { '-' } else { '+' };
        return format!("{}E{}{:02}", mantissa, sign, exponent.abs());
    }

    let int_digits = if abs >= 1.0 {
        abs.log10().floor() as i32 + 1
    } else {
        1
    };
    let decimals = (10 - int_digits).clamp(0, 9) as usize;
    trim_fraction(&format!("{:.*}", decimals, value)).to_string()
}

fn trim_fraction(text: &str) -> &str {
    if text.contains('.') {
        text.trim_end_matches('0').trim_end_matches('.')
    } else {
        text
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Literal(String),
    Digit(char),
    Point,
    Comma,
    Percent,
    Exponent { plus: bool },
    Slash,
    Text,
    General,
    Year(usize),
    MonthOrMinute(usize),
    Month(usize),
    Minute(usize),
    Day(usize),
    Hour(usize),
    Second(usize),
    SubSecond(usize),
    Elapsed(ElapsedUnit),
    AmPm { short: bool, lowercase: bool },
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum ElapsedUnit {
    Hours,
    Minutes,
    Seconds,
}

fn split_sections(code: &str) -> Vec<String> {
    let mut sections = Vec::new();
    let mut current = String::new();
    let mut chars = code.chars();
    let mut in_quote = false;
    let mut in_bracket = false;

    while let Some(c) = chars.next() {
        match c {
            '"' if !in_bracket => in_quote = !in_quote,
            '[' if !in_quote => in_bracket = true,
            ']' if !in_quote => in_bracket = false,
            '\\' if !in_quote => {
                current.push(c);
                if let Some(next) = chars.next() {
                    current.push(next);
                }
                continue;
            }
            ';' if !in_quote && !in_bracket => {
                sections.push(std::mem::take(&mut current));
                continue;
            }
            _ => {}
        }
        current.push(c);
    }
    sections.push(current);
    sections
}

fn tokenize(section: &str) -> Vec<Token> {
    let chars: Vec<char> = section.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        let rest: String = chars[i..].iter().take(7).collect::<String>().to_lowercase();

        match c {
            '"' => {
                let end = chars[i + 1..]
                    .iter()
                    .position(|&ch| ch == '"')
                    .map(|p| i + 1 + p)
                    .unwrap_or(chars.len());
                tokens.push(Token::Literal(chars[i + 1..end].iter().collect()));
                i = end + 1;
            }
            '\\' => {
                if let Some(&next) = chars.get(i + 1) {
                    tokens.push(Token::Literal(next.to_string()));
                }
                i += 2;
            }
            '_' => {
                // width of the next char
                tokens.push(Token::Literal(" ".to_string()));
                i += 2;
            }
            '*' => {
                // fill char
                i += 2;
            }
            '[' => {
                let end = chars[i + 1..]
                    .iter()
                    .position(|&ch| ch == ']')
                    .map(|p| i + 1 + p)
                    .unwrap_or(chars.len());
                let content: String = chars[i + 1..end].iter().collect();
                if let Some(token) = bracket_token(&content) {
                    tokens.push(token);
                }
                i = end + 1;
            }
            '0' | '#' | '?' => {
                tokens.push(Token::Digit(c));
                i += 1;
            }
            '.' => {
                tokens.push(Token::Point);
                i += 1;
            }
            ',' => {
                tokens.push(Token::Comma);
                i += 1;
            }
            '%' => {
                tokens.push(Token::Percent);
                i += 1;
            }
            '/' => {
                tokens.push(Token::Slash);
                i += 1;
            }
            '@' => {
                tokens.push(Token::Text);
                i += 1;
            }
            'E' | 'e' if matches!(chars.get(i + 1), Some('+') | Some('-')) => {
                tokens.push(Token::Exponent {
                    plus: chars[i + 1] == '+',
                });
                i += 2;
            }
            'G' | 'g' if rest.starts_with("general") => {
                tokens.push(Token::General);
                i += 7;
            }
            'A' | 'a' if rest.starts_with("am/pm") => {
                tokens.push(Token::AmPm {
                    short: false,
                    lowercase: c == 'a',
                });
                i += 5;
            }
            'A' | 'a' if rest.starts_with("a/p") => {
                tokens.push(Token::AmPm {
                    short: true,
                    lowercase: c == 'a',
                });
                i += 3;
            }
            'y' | 'Y' | 'm' | 'M' | 'd' | 'D' | 'h' | 'H' | 's' | 'S' => {
                let lower = c.to_ascii_lowercase();
                let run = chars[i..]
                    .iter()
                    .take_while(|ch| ch.to_ascii_lowercase() == lower)
                    .count();
                tokens.push(match lower {
                    'y' => Token::Year(run),
                    'm' => Token::MonthOrMinute(run),
                    'd' => Token::Day(run),
                    'h' => Token::Hour(run),
                    _ => Token::Second(run),
                });
                i += run;
            }
            _ => {
                tokens.push(Token::Literal(c.to_string()));
                i += 1;
            }
        }
    }

    resolve_date_tokens(tokens)
}

fn bracket_token(content: &str) -> Option<Token> {
    if let Some(currency) = content.strip_prefix('$') {
        let symbol = currency.split('-').next().unwrap_or("");
        return (!symbol.is_empty()).then(|| Token::Literal(symbol.to_string()));
    }

    let lower = content.to_ascii_lowercase();
    let unit = lower.chars().next()?;
    if !lower.chars().all(|c| c == unit) {
        // color or condition
        return None;
    }
    match unit {
        'h' => Some(Token::Elapsed(ElapsedUnit::Hours)),
        'm' => Some(Token::Elapsed(ElapsedUnit::Minutes)),
        's' => Some(Token::Elapsed(ElapsedUnit::Seconds)),
        _ => None,
    }
}

fn is_date_token(token: &Token) -> bool {
    matches!(
        token,
        Token::Year(_)
            | Token::MonthOrMinute(_)
            | Token::Month(_)
            | Token::Minute(_)
            | Token::Day(_)
            | Token::Hour(_)
            | Token::Second(_)
            | Token::Elapsed(_)
            | Token::AmPm { .. }
    )
}

fn is_date_section(tokens: &[Token]) -> bool {
    tokens.iter().any(is_date_token)
}

/// Decide `m`/`mm` between month and minute, and turn `.0` after seconds into
/// sub-second digits
fn resolve_date_tokens(mut tokens: Vec<Token>) -> Vec<Token> {
    if !is_date_section(&tokens) {
        return tokens;
    }

    for i in 0..tokens.len() {
        if let Token::MonthOrMinute(run) = tokens[i] {
            let previous = tokens[..i].iter().rev().find(|t| is_date_token(t));
            let next = tokens[i + 1..].iter().find(|t| is_date_token(t));
            let after_hour = matches!(
                previous,
                Some(Token::Hour(_)) | Some(Token::Elapsed(ElapsedUnit::Hours))
            );
            let before_second = matches!(
                next,
                Some(Token::Second(_)) | Some(Token::Elapsed(ElapsedUnit::Seconds))
            );
            tokens[i] = if run <= 2 && (after_hour || before_second) {
                Token::Minute(run)
            } else {
                Token::Month(run)
            };
        }
    }

    let mut resolved = Vec::with_capacity(tokens.len());
    let mut iter = tokens.into_iter().peekable();
    while let Some(token) = iter.next() {
        match token {
            Token::Point if matches!(iter.peek(), Some(Token::Digit('0'))) => {
                let mut digits = 0;
                while matches!(iter.peek(), Some(Token::Digit('0'))) {
                    iter.next();
                    digits += 1;
                }
                resolved.push(Token::SubSecond(digits));
            }
            Token::Point => resolved.push(Token::Literal(".".to_string())),
            Token::Comma => resolved.push(Token::Literal(",".to_string())),
            Token::Slash => resolved.push(Token::Literal("/".to_string())),
            Token::Digit(c) => resolved.push(Token::Literal(c.to_string())),
            other => resolved.push(other),
        }
    }
    resolved
}

/// First serial past 9999-12-31, the last day Excel can display
const MAX_DATE_SERIAL: f64 = 2_958_466.0;

struct Moment {
    year: i32,
    month: u32,
    day: u32,
    weekday: usize,
    hour: u32,
    minute: u32,
    second: u32,
    subsec: f64,
    total_seconds: f64,
}

fn moment(serial: f64, date_system: DateSystem, subsec_digits: usize) -> Result<Moment> {
    if serial < 0.0 {
        return Err(XlsxError::InvalidFormat(format!(
            "negative date serial {}",
            serial
        )));
    }
    if serial >= MAX_DATE_SERIAL {
        return Err(XlsxError::InvalidFormat(format!(
            "date serial {} past 9999-12-31",
            serial
        )));
    }

    let mut days = serial.floor() as i64;
    let scale = 10f64.powi(subsec_digits.min(3) as i32);
    let mut seconds = ((serial - days as f64) * 86_400.0 * scale).round() / scale;
    if seconds >= 86_400.0 {
        days = days.checked_add(1).ok_or_else(|| {
            XlsxError::InvalidFormat(format!("date serial {} out of range", serial))
        })?;
        seconds -= 86_400.0;
    }

    let (year, month, day, weekday) = match (date_system, days) {
        (DateSystem::V1900, 0) => (1900, 1, 0, 6),
        (DateSystem::V1900, 60) => (1900, 2, 29, 3),
        (DateSystem::V1900, d) if d < 60 => {
            let date = add_days(NaiveDate::from_ymd_opt(1899, 12, 31), d)?;
            let real = date.weekday().num_days_from_sunday() as usize;
            // Excel treats 1900-01-01 as a Sunday
            (date.year(), date.month(), date.day(), (real + 6) % 7)
        }
        (DateSystem::V1900, d) => {
            let date = add_days(NaiveDate::from_ymd_opt(1899, 12, 30), d)?;
            let weekday = date.weekday().num_days_from_sunday() as usize;
            (date.year(), date.month(), date.day(), weekday)
        }
        (DateSystem::V1904, d) => {
            let date = add_days(NaiveDate::from_ymd_opt(1904, 1, 1), d)?;
            let weekday = date.weekday().num_days_from_sunday() as usize;
            (date.year(), date.month(), date.day(), weekday)
        }
    };

    let whole = seconds.floor();
    let whole_secs = whole as u32;
    Ok(Moment {
        year,
        month,
        day,
        weekday,
        hour: whole_secs / 3600,
        minute: (whole_secs / 60) % 60,
        second: whole_secs % 60,
        subsec: seconds - whole,
        total_seconds: days as f64 * 86_400.0 + seconds,
    })
}

fn add_days(base: Option<NaiveDate>, days: i64) -> Result<NaiveDate> {
    base.and_then(|date| date.checked_add_days(Days::new(days as u64)))
        .ok_or_else(|| XlsxError::InvalidFormat(format!("date serial {} out of range", days)))
}

fn render_date(tokens: &[Token], serial: f64, date_system: DateSystem) -> Result<String> {
    let subsec_digits = tokens
        .iter()
        .find_map(|t| match t {
            Token::SubSecond(n) => Some(*n),
            _ => None,
        })
        .unwrap_or(0);
    let m = moment(serial, date_system, subsec_digits)?;
    let twelve_hour = tokens.iter().any(|t| matches!(t, Token::AmPm { .. }));

    let mut out = String::new();
    for token in tokens {
        match token {
            Token::Literal(text) => out.push_str(text),
            Token::Year(n) => {
                if *n <= 2 {
                    out.push_str(&format!("{:02}", m.year.rem_euclid(100)));
                } else {
                    out.push_str(&format!("{:04}", m.year));
                }
            }
            Token::Month(n) => {
                let name = MONTH_NAMES[(m.month as usize + 11) % 12];
                match n {
                    1 => out.push_str(&m.month.to_string()),
                    2 => out.push_str(&format!("{:02}", m.month)),
                    3 => out.push_str(&name[..3]),
                    4 => out.push_str(name),
                    _ => out.push_str(&name[..1]),
                }
            }
            Token::Day(n) => match n {
                1 => out.push_str(&m.day.to_string()),
                2 => out.push_str(&format!("{:02}", m.day)),
                3 => out.push_str(&DAY_NAMES[m.weekday][..3]),
                _ => out.push_str(DAY_NAMES[m.weekday]),
            },
            Token::Hour(n) => {
                let hour = if twelve_hour {
                    match m.hour % 12 {
                        0 => 12,
                        h => h,
                    }
                } else {
                    m.hour
                };
                if *n >= 2 {
                    out.push_str(&format!("{:02}", hour));
                } else {
                    out.push_str(&hour.to_string());
                }
            }
            Token::Minute(n) | Token::MonthOrMinute(n) => {
                if *n >= 2 {
                    out.push_str(&format!("{:02}", m.minute));
                } else {
                    out.push_str(&m.minute.to_string());
                }
            }
            Token::Second(n) => {
                if *n >= 2 {
                    out.push_str(&format!("{:02}", m.second));
                } else {
                    out.push_str(&m.second.to_string());
                }
            }
            Token::SubSecond(n) => {
                let digits = (*n).min(3);
                let fraction = format!("{:.*}", digits, m.subsec);
                out.push_str(fraction.trim_start_matches('0'));
            }
            Token::Elapsed(unit) => {
                let total = m.total_seconds.floor();
                let value = match unit {
                    ElapsedUnit::Hours => (total / 3600.0).floor(),
                    ElapsedUnit::Minutes => (total / 60.0).floor(),
                    ElapsedUnit::Seconds => total,
                };
                out.push_str(&(value as i64).to_string());
            }
            Token::AmPm { short, lowercase } => {
                let text = match (m.hour < 12, short) {
                    (true, false) => "AM",
                    (false, false) => "PM",
                    (true, true) => "A",
                    (false, true) => "P",
                };
                if *lowercase {
                    out.push_str(&text.to_lowercase());
                } else {
                    out.push_str(text);
                }
            }
            Token::General | Token::Text => out.push_str(&format_general(serial)),
            _ => {}
        }
    }
    Ok(out)
}

fn is_digit(token: &Token) -> bool {
    matches!(token, Token::Digit(_))
}

fn render_number(tokens: &[Token], value: f64, show_minus: bool) -> Result<String> {
    if let Some(slash) = tokens.iter().position(|t| *t == Token::Slash) {
        let digits_before = slash > 0 && is_digit(&tokens[slash - 1]);
        if digits_before {
            return Ok(render_fraction(tokens, slash, value, show_minus));
        }
    }

    let negative = show_minus && value < 0.0;
    let mut v = value.abs();

    if !tokens.iter().any(is_digit) {
        // only literals, General or @
        let mut out = String::new();
        for token in tokens {
            match token {
                Token::Literal(text) => out.push_str(text),
                Token::General | Token::Text => {
                    out.push_str(&format_general(if show_minus { value } else { v }))
                }
                Token::Percent => out.push('%'),
                Token::Point => out.push('.'),
                Token::Comma => out.push(','),
                Token::Slash => out.push('/'),
                _ => {}
            }
        }
        return Ok(out);
    }

    let point = tokens.iter().position(|t| *t == Token::Point);
    let exponent_at = tokens
        .iter()
        .position(|t| matches!(t, Token::Exponent { .. }));
    let mantissa_end = exponent_at.unwrap_or(tokens.len());
    let int_end = point.unwrap_or(mantissa_end).min(mantissa_end);

    let percents = tokens.iter().filter(|t| **t == Token::Percent).count();
    v *= 100f64.powi(percents as i32);

    let mut grouping = false;
    let mut scale_commas = 0;
    for i in 0..int_end {
        if tokens[i] == Token::Comma {
            if tokens[i + 1..int_end].iter().any(is_digit) {
                grouping = true;
            } else if tokens[..i].iter().any(is_digit) {
                scale_commas += 1;
            }
        }
    }
    v /= 1000f64.powi(scale_commas);

    let int_slots: Vec<usize> = (0..int_end).filter(|&i| is_digit(&tokens[i])).collect();
    let frac_slots: Vec<usize> = match point {
        Some(p) if p < mantissa_end => (p + 1..mantissa_end)
            .filter(|&i| is_digit(&tokens[i]))
            .collect(),
        _ => Vec::new(),
    };
    let exp_slots: Vec<usize> = match exponent_at {
        Some(e) => (e + 1..tokens.len())
            .filter(|&i| is_digit(&tokens[i]))
            .collect(),
        None => Vec::new(),
    };

    let mut exponent = 0i32;
    let mut rendered = format!("{:.*}", frac_slots.len(), v);
    if exponent_at.is_some() && v != 0.0 {
        let step = if int_slots.len() > 1 && tokens[int_slots[0]] == Token::Digit('#') {
            int_slots.len() as i32
        } else {
            1
        };
        exponent = (v.log10().floor() as i32).div_euclid(step) * step;
        let mut mantissa = v / 10f64.powi(exponent);
        rendered = format!("{:.*}", frac_slots.len(), mantissa);
        if rendered.parse::<f64>().unwrap_or(0.0) >= 10f64.powi(step) {
            exponent += step;
            mantissa = v / 10f64.powi(exponent);
            rendered = format!("{:.*}", frac_slots.len(), mantissa);
        }
    }

    let (int_text, frac_text) = rendered
        .split_once('.')
        .unwrap_or((rendered.as_str(), ""));
    let int_text = if int_text == "0" { "" } else { int_text };
    let int_digits = if grouping {
        group_thousands(int_text)
    } else {
        int_text.to_string()
    };

    let mut assigned: Vec<String> = vec![String::new(); tokens.len()];

    let mut remaining: Vec<char> = int_digits.chars().collect();
    for (k, &slot) in int_slots.iter().rev().enumerate() {
        let leftmost = k == int_slots.len() - 1;
        if leftmost && !remaining.is_empty() {
            assigned[slot] = remaining.drain(..).collect();
        } else if let Some(ch) = remaining.pop() {
            assigned[slot] = ch.to_string();
        } else {
            assigned[slot] = pad_for(&tokens[slot]);
        }
    }

    let frac_chars: Vec<char> = frac_text.chars().collect();
    let mut trimming = true;
    for (k, &slot) in frac_slots.iter().enumerate().rev() {
        let ch = frac_chars.get(k).copied().unwrap_or('0');
        if trimming && ch == '0' && tokens[slot] != Token::Digit('0') {
            assigned[slot] = pad_for(&tokens[slot]);
        } else {
            trimming = false;
            assigned[slot] = ch.to_string();
        }
    }

    if let Some(&first) = exp_slots.first() {
        let mut buffer = itoa::Buffer::new();
        let digits = buffer.format(exponent.unsigned_abs());
        assigned[first] = format!("{:0>width$}", digits, width = exp_slots.len());
    }

    let mut out = String::new();
    if negative {
        out.push('-');
    }
    for (i, token) in tokens.iter().enumerate() {
        match token {
            Token::Literal(text) => out.push_str(text),
            Token::Digit(_) => out.push_str(&assigned[i]),
            Token::Point => out.push('.'),
            Token::Percent => out.push('%'),
            Token::Exponent { plus } => {
                out.push('E');
                if exponent < 0 {
                    out.push('-');
                } else if *plus {
                    out.push('+');
                }
            }
            Token::General | Token::Text => out.push_str(&format_general(v)),
            _ => {}
        }
    }
    Ok(out)
}

fn pad_for(token: &Token) -> String {
    match token {
        Token::Digit('0') => "0".to_string(),
        Token::Digit('?') => " ".to_string(),
        _ => String::new(),
    }
}

fn group_thousands(digits: &str) -> String {
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(ch);
    }
    out
}

fn render_fraction(tokens: &[Token], slash: usize, value: f64, show_minus: bool) -> String {
    let numerator_start = tokens[..slash]
        .iter()
        .rposition(|t| !is_digit(t))
        .map(|p| p + 1)
        .unwrap_or(0);
    let has_whole = tokens[..numerator_start].iter().any(is_digit);

    let mut denominator_slots = 0usize;
    let mut fixed_denominator = String::new();
    let mut end = slash + 1;
    while let Some(token) = tokens.get(end) {
        match token {
            Token::Digit(_) => denominator_slots += 1,
            Token::Literal(text) if text.chars().all(|c| c.is_ascii_digit()) => {
                fixed_denominator.push_str(text)
            }
            _ => break,
        }
        end += 1;
    }

    let negative = show_minus && value < 0.0;
    let v = value.abs();
    let (mut whole, fraction) = if has_whole {
        (v.trunc(), v.fract())
    } else {
        (0.0, v)
    };

    let (mut numerator, denominator) = match fixed_denominator.parse::<u32>() {
        Ok(d) if d > 0 => ((fraction * d as f64).round(), d as f64),
        _ => {
            let max = 10u32.pow(denominator_slots.clamp(1, 4) as u32) - 1;
            best_fraction(fraction, max)
        }
    };
    if has_whole && numerator >= denominator {
        whole += 1.0;
        numerator -= denominator;
    }

    let mut out = String::new();
    for token in &tokens[..tokens.iter().position(is_digit).unwrap_or(0)] {
        if let Token::Literal(text) = token {
            out.push_str(text);
        }
    }
    if negative {
        out.push('-');
    }
    if has_whole && (whole > 0.0 || numerator == 0.0) {
        out.push_str(&format_general(whole));
    }
    if numerator != 0.0 || !has_whole {
        if has_whole && whole > 0.0 {
            out.push(' ');
        }
        out.push_str(&format!("{}/{}", numerator as i64, denominator as i64));
    }
    for token in &tokens[end..] {
        if let Token::Literal(text) = token {
            out.push_str(text);
        }
    }
    out
}

fn best_fraction(x: f64, max_denominator: u32) -> (f64, f64) {
    let mut best = (x.round(), 1.0);
    let mut best_error = (x - best.0).abs();
    for d in 2..=max_denominator {
        let n = (x * d as f64).round();
        let error = (x - n / d as f64).abs();
        if error < best_error - 1e-12 {
            best = (n, d as f64);
            best_error = error;
        }
    }
    best
}
