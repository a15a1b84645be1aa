//! Query parameter validation.
//!
//! Every parameter is optional. Numeric fields accept a short and a long key
//! (`w` / `width`); the first alias present wins and later ones are ignored.
//! An empty value counts as absent. Anything unparsable or out of range
//! fails the request before the upstream is contacted.
//!
//! | Field | Keys | Range |
//! |---|---|---|
//! | height | `h`, `height` | 0–20000 |
//! | width | `w`, `width` | 0–20000 |
//! | rotate | `r`, `rotate` | 0–360 |
//! | quality | `q`, `quality` | 1–100 |
//! | format | `f`, `format` | see [`OutputFormat::from_name`] |
//! | sharpen | `s`, `sharpen` | 0–1 |
//! | blur | `b`, `blur` | 0–1 |
//! | upscale | `up`, `upscale` | `"true"` |
//! | strip | `strip` | `"true"` |
//! | webp | `webp` | `auto`, `force` |

use crate::imaging::{OutputFormat, Quality, Transforms, WebpMode};
use crate::source_url::{self, UrlError};
use std::ops::RangeInclusive;
use thiserror::Error;
use url::Url;

/// Upper bound on either requested dimension.
pub const MAX_DIMENSION: u32 = 20_000;

const HEIGHT: &[&str] = &["h", "height"];
const WIDTH: &[&str] = &["w", "width"];
const ROTATE: &[&str] = &["r", "rotate"];
const QUALITY: &[&str] = &["q", "quality"];
const FORMAT: &[&str] = &["f", "format"];
const SHARPEN: &[&str] = &["s", "sharpen"];
const BLUR: &[&str] = &["b", "blur"];
const UPSCALE: &[&str] = &["up", "upscale"];
const STRIP: &[&str] = &["strip"];
const WEBP: &[&str] = &["webp"];

const RECOGNIZED: &[&[&str]] = &[
    HEIGHT, WIDTH, ROTATE, QUALITY, FORMAT, SHARPEN, BLUR, UPSCALE, STRIP, WEBP,
];

/// A query parameter that failed validation.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("invalid value for {key}: {value:?} ({reason})")]
pub struct ParamError {
    pub key: &'static str,
    pub value: String,
    pub reason: String,
}

impl ParamError {
    fn new(key: &'static str, value: &str, reason: impl Into<String>) -> Self {
        Self {
            key,
            value: value.to_string(),
            reason: reason.into(),
        }
    }
}

#[derive(Error, Debug)]
pub enum RequestError {
    #[error(transparent)]
    Param(#[from] ParamError),
    #[error(transparent)]
    Url(#[from] UrlError),
}

/// A fully validated transform request.
#[derive(Debug, Clone, PartialEq)]
pub struct TransformRequest {
    pub url: Url,
    pub width: u32,
    pub height: u32,
    pub rotate: u32,
    pub quality: Option<Quality>,
    pub format: OutputFormat,
    pub sharpen: f64,
    pub blur: f64,
    pub upscale: bool,
    pub strip: bool,
    pub webp: WebpMode,
    supplied: bool,
}

/// Decode a raw query string into ordered key/value pairs.
pub fn parse_query(raw: &str) -> Vec<(String, String)> {
    url::form_urlencoded::parse(raw.as_bytes())
        .into_owned()
        .collect()
}

fn parse_int(key: &'static str, value: &str) -> Result<i64, ParamError> {
    value
        .parse()
        .map_err(|e: std::num::ParseIntError| ParamError::new(key, value, e.to_string()))
}

fn out_of_range(
    key: &'static str,
    value: &str,
    min: impl std::fmt::Display,
    max: impl std::fmt::Display,
) -> ParamError {
    ParamError::new(key, value, format!("must be between {min} and {max}"))
}

struct Query<'a> {
    pairs: &'a [(String, String)],
}

impl<'a> Query<'a> {
    /// First occurrence of `key`, if its value is non-empty.
    fn get(&self, key: &str) -> Option<&'a str> {
        self.pairs
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
            .filter(|v| !v.is_empty())
    }

    /// First alias with a value, together with the alias that matched.
    fn lookup(&self, aliases: &[&'static str]) -> Option<(&'static str, &'a str)> {
        aliases
            .iter()
            .find_map(|&key| self.get(key).map(|value| (key, value)))
    }

    fn int(&self, aliases: &[&'static str], range: RangeInclusive<u32>) -> Result<u32, ParamError> {
        let Some((key, value)) = self.lookup(aliases) else {
            return Ok(0);
        };
        u32::try_from(parse_int(key, value)?)
            .ok()
            .filter(|n| range.contains(n))
            .ok_or_else(|| out_of_range(key, value, range.start(), range.end()))
    }

    fn float(&self, aliases: &[&'static str], range: RangeInclusive<f64>) -> Result<f64, ParamError> {
        let Some((key, value)) = self.lookup(aliases) else {
            return Ok(0.0);
        };
        let parsed: f64 = value
            .parse()
            .map_err(|e: std::num::ParseFloatError| ParamError::new(key, value, e.to_string()))?;
        if !parsed.is_finite() || !range.contains(&parsed) {
            return Err(out_of_range(key, value, range.start(), range.end()));
        }
        Ok(parsed)
    }

    fn flag(&self, aliases: &[&'static str]) -> bool {
        self.lookup(aliases).is_some_and(|(_, v)| v == "true")
    }

    fn quality(&self) -> Result<Option<Quality>, ParamError> {
        let Some((key, value)) = self.lookup(QUALITY) else {
            return Ok(None);
        };
        u32::try_from(parse_int(key, value)?)
            .ok()
            .and_then(Quality::checked)
            .map(Some)
            .ok_or_else(|| out_of_range(key, value, Quality::MIN, Quality::MAX))
    }

    fn format(&self) -> Result<OutputFormat, ParamError> {
        match self.lookup(FORMAT) {
            None => Ok(OutputFormat::Unspecified),
            Some((key, value)) => OutputFormat::from_name(value)
                .ok_or_else(|| ParamError::new(key, value, "unknown output format")),
        }
    }

    fn webp(&self) -> Result<WebpMode, ParamError> {
        match self.lookup(WEBP) {
            None => Ok(WebpMode::Off),
            Some((key, value)) => WebpMode::from_name(value)
                .ok_or_else(|| ParamError::new(key, value, "expected auto or force")),
        }
    }

    fn any_recognized(&self) -> bool {
        RECOGNIZED
            .iter()
            .any(|aliases| self.lookup(aliases).is_some())
    }
}

impl TransformRequest {
    /// Validate every parameter, then normalize the target URL.
    pub fn from_query(raw_url: &str, query: &[(String, String)]) -> Result<Self, RequestError> {
        let query = Query { pairs: query };

        let height = query.int(HEIGHT, 0..=MAX_DIMENSION)?;
        let width = query.int(WIDTH, 0..=MAX_DIMENSION)?;
        let rotate = query.int(ROTATE, 0..=360)?;
        let quality = query.quality()?;
        let format = query.format()?;
        let sharpen = query.float(SHARPEN, 0.0..=1.0)?;
        let blur = query.float(BLUR, 0.0..=1.0)?;
        let webp = query.webp()?;

        Ok(Self {
            url: source_url::normalize(raw_url)?,
            width,
            height,
            rotate,
            quality,
            format,
            sharpen,
            blur,
            upscale: query.flag(UPSCALE),
            strip: query.flag(STRIP),
            webp,
            supplied: query.any_recognized(),
        })
    }

    /// Whether any transform parameter was supplied at all. Requests without
    /// one are served straight from the upstream bytes.
    pub fn has_transforms(&self) -> bool {
        self.supplied
    }

    pub fn transforms(&self) -> Transforms {
        Transforms {
            width: self.width,
            height: self.height,
            rotate: self.rotate,
            blur: self.blur,
            sharpen: self.sharpen,
            upscale: self.upscale,
            strip: self.strip,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(query: &str) -> Result<TransformRequest, RequestError> {
        TransformRequest::from_query("example.com/cat.jpg", &parse_query(query))
    }

    fn param_err(query: &str) -> ParamError {
        match parse(query) {
            Err(RequestError::Param(e)) => e,
            other => panic!("expected param error for {query:?}, got {other:?}"),
        }
    }

    #[test]
    fn empty_query_is_all_defaults() {
        let req = parse("").unwrap();
        assert_eq!(req.width, 0);
        assert_eq!(req.height, 0);
        assert_eq!(req.rotate, 0);
        assert_eq!(req.quality, None);
        assert_eq!(req.format, OutputFormat::Unspecified);
        assert_eq!(req.sharpen, 0.0);
        assert_eq!(req.blur, 0.0);
        assert!(!req.upscale);
        assert!(!req.strip);
        assert_eq!(req.webp, WebpMode::Off);
        assert!(!req.has_transforms());
        assert_eq!(req.url.as_str(), "https://example.com/cat.jpg");
    }

    #[test]
    fn short_and_long_keys() {
        let req = parse("w=200&height=100&r=90&quality=80&f=png&s=0.5&blur=0.25").unwrap();
        assert_eq!(req.width, 200);
        assert_eq!(req.height, 100);
        assert_eq!(req.rotate, 90);
        assert_eq!(req.quality, Some(Quality(80)));
        assert_eq!(req.format, OutputFormat::Png);
        assert_eq!(req.sharpen, 0.5);
        assert_eq!(req.blur, 0.25);
        assert!(req.has_transforms());
    }

    #[test]
    fn first_alias_wins() {
        let req = parse("width=300&w=200").unwrap();
        assert_eq!(req.width, 200);
        // later alias is ignored even when invalid
        let req = parse("h=10&height=banana").unwrap();
        assert_eq!(req.height, 10);
    }

    #[test]
    fn empty_value_counts_as_absent() {
        let req = parse("w=&width=120").unwrap();
        assert_eq!(req.width, 120);
        let req = parse("q=").unwrap();
        assert_eq!(req.quality, None);
    }

    #[test]
    fn dimension_bounds() {
        assert_eq!(parse("h=20000").unwrap().height, 20_000);
        let err = param_err("h=99999");
        assert_eq!(err.key, "h");
        assert_eq!(err.value, "99999");
        assert!(err.to_string().contains("between 0 and 20000"));

        let err = param_err("width=-1");
        assert_eq!(err.key, "width");
    }

    #[test]
    fn rotate_bounds() {
        assert_eq!(parse("r=360").unwrap().rotate, 360);
        assert_eq!(param_err("rotate=361").key, "rotate");
    }

    #[test]
    fn quality_bounds() {
        assert_eq!(parse("q=1").unwrap().quality, Some(Quality(1)));
        assert_eq!(parse("q=100").unwrap().quality, Some(Quality(100)));
        assert_eq!(param_err("q=0").key, "q");
        assert_eq!(param_err("quality=101").key, "quality");
        assert_eq!(param_err("q=-5").reason, "must be between 1 and 100");
    }

    #[test]
    fn float_bounds() {
        assert_eq!(parse("s=1").unwrap().sharpen, 1.0);
        assert_eq!(param_err("s=1.5").key, "s");
        assert_eq!(param_err("blur=-0.1").key, "blur");
        assert_eq!(param_err("b=NaN").key, "b");
        assert_eq!(param_err("b=inf").key, "b");
    }

    #[test]
    fn unparsable_numbers_name_the_literal() {
        let err = param_err("w=wide");
        assert_eq!(err.key, "w");
        assert_eq!(err.value, "wide");
        assert!(err.to_string().contains("\"wide\""));
    }

    #[test]
    fn format_literals() {
        assert_eq!(parse("format=JPG").unwrap().format, OutputFormat::Jpeg);
        assert_eq!(parse("f=heic").unwrap().format, OutputFormat::Heif);
        assert_eq!(param_err("format=bmp").key, "format");
    }

    #[test]
    fn flags_require_exact_true() {
        assert!(parse("up=true").unwrap().upscale);
        assert!(parse("upscale=true").unwrap().upscale);
        assert!(!parse("up=1").unwrap().upscale);
        assert!(!parse("up=TRUE").unwrap().upscale);
        assert!(parse("strip=true").unwrap().strip);
        assert!(!parse("strip=yes").unwrap().strip);
    }

    #[test]
    fn false_flag_still_counts_as_supplied() {
        let req = parse("up=false").unwrap();
        assert!(!req.upscale);
        assert!(req.has_transforms());
    }

    #[test]
    fn unknown_keys_do_not_trigger_transforms() {
        assert!(!parse("cachebust=123").unwrap().has_transforms());
    }

    #[test]
    fn webp_modes() {
        assert_eq!(parse("webp=auto").unwrap().webp, WebpMode::Auto);
        assert_eq!(parse("webp=force").unwrap().webp, WebpMode::Force);
        assert_eq!(param_err("webp=always").key, "webp");
    }

    #[test]
    fn params_are_checked_before_the_url() {
        let result = TransformRequest::from_query("ftp://host/x.png", &parse_query("h=99999"));
        assert!(matches!(result, Err(RequestError::Param(_))));
        let result = TransformRequest::from_query("ftp://host/x.png", &parse_query("h=10"));
        assert!(matches!(result, Err(RequestError::Url(_))));
    }

    #[test]
    fn transforms_subset() {
        let t = parse("w=10&r=45&up=true&strip=true").unwrap().transforms();
        assert_eq!(
            t,
            Transforms {
                width: 10,
                height: 0,
                rotate: 45,
                blur: 0.0,
                sharpen: 0.0,
                upscale: true,
                strip: true,
            }
        );
    }
}
