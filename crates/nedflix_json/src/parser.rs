//! 递归下降解析器
//!
//! 单字符前瞻；输入在第一个 NUL 字节处截止。

use crate::{JsonValue, ParseError};

/// 最大嵌套深度
pub const MAX_DEPTH: usize = 128;

/// 解析文本，失败返回 `None`
pub fn parse(text: &str) -> Option<JsonValue> {
    parse_slice(text.as_bytes())
}

/// 解析字节缓冲（例如 HTTP 响应体），失败返回 `None`
pub fn parse_slice(bytes: &[u8]) -> Option<JsonValue> {
    match try_parse_slice(bytes) {
        Ok(value) => Some(value),
        Err(e) => {
            log::debug!("JSON parse failed: {}", e);
            None
        }
    }
}

/// 解析文本，返回失败原因
pub fn try_parse(text: &str) -> Result<JsonValue, ParseError> {
    try_parse_slice(text.as_bytes())
}

pub fn try_parse_slice(bytes: &[u8]) -> Result<JsonValue, ParseError> {
    let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    let input = &bytes[..end];
    if input.is_empty() {
        return Err(ParseError::Empty);
    }

    let mut parser = Parser {
        input,
        pos: 0,
        depth: 0,
    };
    parser.skip_whitespace();
    // 根值之后的内容不再检查
    parser.parse_value()
}

struct Parser<'a> {
    input: &'a [u8],
    pos: usize,
    depth: usize,
}

impl Parser<'_> {
    fn peek(&self) -> Option<u8> {
        self.input.get(self.pos).copied()
    }

    fn skip_whitespace(&mut self) {
        while let Some(b' ' | b'\t' | b'\r' | b'\n') = self.peek() {
            self.pos += 1;
        }
    }

    fn unexpected(&self) -> ParseError {
        match self.peek() {
            Some(b) => ParseError::UnexpectedChar {
                ch: char::from(b),
                offset: self.pos,
            },
            None => ParseError::UnexpectedEnd,
        }
    }

    fn expect(&mut self, byte: u8) -> Result<(), ParseError> {
        if self.peek() == Some(byte) {
            self.pos += 1;
            Ok(())
        } else {
            Err(self.unexpected())
        }
    }

    fn parse_value(&mut self) -> Result<JsonValue, ParseError> {
        match self.peek() {
            None => Err(ParseError::UnexpectedEnd),
            Some(b'n') => self.parse_literal(b"null", JsonValue::Null),
            Some(b't') => self.parse_literal(b"true", JsonValue::Bool(true)),
            Some(b'f') => self.parse_literal(b"false", JsonValue::Bool(false)),
            Some(b'"') => self.parse_string().map(JsonValue::String),
            Some(b'[') => self.nested(Self::parse_array),
            Some(b'{') => self.nested(Self::parse_object),
            Some(b'-' | b'0'..=b'9') => self.parse_number(),
            Some(_) => Err(self.unexpected()),
        }
    }

    fn nested(
        &mut self,
        f: fn(&mut Self) -> Result<JsonValue, ParseError>,
    ) -> Result<JsonValue, ParseError> {
        if self.depth >= MAX_DEPTH {
            return Err(ParseError::TooDeep(MAX_DEPTH));
        }
        self.depth += 1;
        let result = f(self);
        self.depth -= 1;
        result
    }

    fn parse_literal(&mut self, word: &[u8], value: JsonValue) -> Result<JsonValue, ParseError> {
        for &expected in word {
            if self.peek() != Some(expected) {
                return Err(self.unexpected());
            }
            self.pos += 1;
        }
        Ok(value)
    }

    fn parse_string(&mut self) -> Result<String, ParseError> {
        let start = self.pos;
        self.expect(b'"')?;

        let mut buf = Vec::new();
        loop {
            let Some(b) = self.peek() else {
                return Err(ParseError::UnexpectedEnd);
            };
            self.pos += 1;
            match b {
                b'"' => break,
                b'\\' => {
                    let Some(escaped) = self.peek() else {
                        return Err(ParseError::UnexpectedEnd);
                    };
                    self.pos += 1;
                    buf.push(match escaped {
                        b'n' => b'\n',
                        b'r' => b'\r',
                        b't' => b'\t',
                        // \" \\ \/ 以及其余字符原样保留，不支持 \uXXXX
                        other => other,
                    });
                }
                other => buf.push(other),
            }
        }

        String::from_utf8(buf).map_err(|_| ParseError::InvalidUtf8(start))
    }

    fn skip_digits(&mut self) -> usize {
        let start = self.pos;
        while let Some(b'0'..=b'9') = self.peek() {
            self.pos += 1;
        }
        self.pos - start
    }

    /// 一次扫描取最长的合法数字前缀（与 strtod 一致）
    ///
    /// `-? digits [. digits] [e|E [+-] digits]`，整数与小数部分至少一位数字；
    /// 不完整的指数不计入，例如 `1.5e` 取 `1.5`。
    fn parse_number(&mut self) -> Result<JsonValue, ParseError> {
        let start = self.pos;
        if self.peek() == Some(b'-') {
            self.pos += 1;
        }
        let mut digits = self.skip_digits();
        if self.peek() == Some(b'.') {
            self.pos += 1;
            digits += self.skip_digits();
        }
        if digits == 0 {
            self.pos = start;
            return Err(self.unexpected());
        }

        let mantissa_end = self.pos;
        if let Some(b'e' | b'E') = self.peek() {
            self.pos += 1;
            if let Some(b'+' | b'-') = self.peek() {
                self.pos += 1;
            }
            if self.skip_digits() == 0 {
                self.pos = mantissa_end;
            }
        }

        // 数字字符均为 ASCII
        let text = std::str::from_utf8(&self.input[start..self.pos])
            .map_err(|_| ParseError::InvalidUtf8(start))?;
        match text.parse::<f64>() {
            Ok(n) => Ok(JsonValue::Number(n)),
            Err(_) => {
                self.pos = start;
                Err(self.unexpected())
            }
        }
    }

    fn parse_array(&mut self) -> Result<JsonValue, ParseError> {
        self.expect(b'[')?;
        let mut items = Vec::with_capacity(8);

        self.skip_whitespace();
        if self.peek() == Some(b']') {
            self.pos += 1;
            return Ok(JsonValue::Array(items));
        }

        loop {
            self.skip_whitespace();
            items.push(self.parse_value()?);
            self.skip_whitespace();
            match self.peek() {
                Some(b',') => self.pos += 1,
                Some(b']') => {
                    self.pos += 1;
                    return Ok(JsonValue::Array(items));
                }
                _ => return Err(self.unexpected()),
            }
        }
    }

    fn parse_object(&mut self) -> Result<JsonValue, ParseError> {
        self.expect(b'{')?;
        let mut members = Vec::with_capacity(8);

        self.skip_whitespace();
        if self.peek() == Some(b'}') {
            self.pos += 1;
            return Ok(JsonValue::Object(members));
        }

        loop {
            self.skip_whitespace();
            let key = self.parse_string()?;
            self.skip_whitespace();
            self.expect(b':')?;
            self.skip_whitespace();
            let value = self.parse_value()?;
            members.push((key, value));

            self.skip_whitespace();
            match self.peek() {
                Some(b',') => self.pos += 1,
                Some(b'}') => {
                    self.pos += 1;
                    return Ok(JsonValue::Object(members));
                }
                _ => return Err(self.unexpected()),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{array_get, array_length, get_int, get_string};

    #[test]
    fn test_login_token() {
        let root = parse("{\"token\":\"abc123\"}").unwrap();
        assert_eq!(get_string(&root, "token"), Some("abc123"));
    }

    #[test]
    fn test_scalars() {
        assert_eq!(parse("null"), Some(JsonValue::Null));
        assert_eq!(parse(" true "), Some(JsonValue::Bool(true)));
        assert_eq!(parse("false"), Some(JsonValue::Bool(false)));
        assert_eq!(parse("-12.5e1"), Some(JsonValue::Number(-125.0)));
        assert_eq!(parse("0"), Some(JsonValue::Number(0.0)));
        assert_eq!(parse("\"hi\""), Some(JsonValue::String("hi".into())));
    }

    #[test]
    fn test_literals_are_case_sensitive() {
        assert_eq!(parse("True"), None);
        assert_eq!(parse("NULL"), None);
        assert_eq!(parse("nul"), None);
        assert_eq!(parse("fals"), None);
    }

    #[test]
    fn test_nan_and_inf_are_rejected() {
        assert_eq!(parse("NaN"), None);
        assert_eq!(parse("inf"), None);
        assert_eq!(parse("-"), None);
    }

    #[test]
    fn test_out_of_range_number_is_permissive() {
        assert_eq!(parse("1e999"), Some(JsonValue::Number(f64::INFINITY)));
    }

    #[test]
    fn test_number_takes_longest_valid_prefix() {
        // "1.5e" -> 1.5，剩余的 "e" 位于根值之后被忽略
        assert_eq!(parse("1.5e"), Some(JsonValue::Number(1.5)));
        // 数组内剩余字符不是分隔符
        assert_eq!(parse("[1.5e]"), None);
        assert_eq!(parse("[1-2]"), None);
        assert_eq!(parse("2e+"), Some(JsonValue::Number(2.0)));
        assert_eq!(parse("[2E-1]"), Some(JsonValue::Array(vec![JsonValue::Number(0.2)])));
        assert_eq!(parse("-.5"), Some(JsonValue::Number(-0.5)));
        assert_eq!(parse("7."), Some(JsonValue::Number(7.0)));
        assert_eq!(parse("-.e1"), None);
    }

    #[test]
    fn test_long_number_runs() {
        // 大量无效尾随字符只扫描一遍
        let text = "1".to_owned() + &"e1".repeat(50_000);
        assert_eq!(parse(&text), Some(JsonValue::Number(10.0)));

        let text = "-".to_owned() + &"+-.".repeat(50_000);
        assert_eq!(parse(&text), None);

        let digits = "9".repeat(4096);
        assert_eq!(
            parse(&format!("[{digits}]")),
            Some(JsonValue::Array(vec![JsonValue::Number(f64::INFINITY)]))
        );
        let digits = "1".to_owned() + &"0".repeat(300) + ".25";
        assert_eq!(parse(&digits), Some(JsonValue::Number(1e300)));
    }

    #[test]
    fn test_string_escapes() {
        let v = parse(r#""a\nb\rc\td\"e\\f\/g""#).unwrap();
        assert_eq!(v.as_str(), Some("a\nb\rc\td\"e\\f/g"));
    }

    #[test]
    fn test_unknown_escapes_pass_through() {
        let v = parse(r#""\u0041\b\q""#).unwrap();
        assert_eq!(v.as_str(), Some("u0041bq"));
    }

    #[test]
    fn test_non_ascii_strings() {
        let v = parse("{\"title\":\"猫の歌 ♪\"}").unwrap();
        assert_eq!(get_string(&v, "title"), Some("猫の歌 ♪"));
    }

    #[test]
    fn test_nested_structures() {
        let text = r#"
            {
                "files": [
                    {"name": "a.wav", "isDirectory": false, "size": 1024},
                    {"name": "music", "isDirectory": true}
                ],
                "meta": {"page": 1, "tags": []}
            }
        "#;
        let root = parse(text).unwrap();
        let files = root.get("files").unwrap();
        assert_eq!(array_length(files), 2);
        let first = array_get(files, 0).unwrap();
        assert_eq!(get_string(first, "name"), Some("a.wav"));
        assert_eq!(get_int(first, "size", 0), 1024);
        let meta = root.get("meta").unwrap();
        assert_eq!(array_length(meta.get("tags").unwrap()), 0);
    }

    #[test]
    fn test_empty_containers_are_not_failures() {
        assert_eq!(parse("{}"), Some(JsonValue::Object(vec![])));
        assert_eq!(parse("[ ]"), Some(JsonValue::Array(vec![])));
    }

    #[test]
    fn test_duplicate_keys_first_match_wins() {
        let root = parse(r#"{"a":1,"a":2}"#).unwrap();
        assert_eq!(get_int(&root, "a", 0), 1);
        assert_eq!(root.as_object().map(<[_]>::len), Some(2));
    }

    #[test]
    fn test_truncated_array_fails() {
        assert_eq!(parse("[1,2,"), None);
        assert_eq!(try_parse("[1,2,"), Err(ParseError::UnexpectedEnd));
    }

    #[test]
    fn test_malformed_inputs() {
        assert_eq!(try_parse(""), Err(ParseError::Empty));
        assert_eq!(parse("   "), None);
        assert_eq!(parse("[1,]"), None);
        assert_eq!(parse("{\"a\":1,}"), None);
        assert_eq!(parse("{\"a\" 1}"), None);
        assert_eq!(parse("{a:1}"), None);
        assert_eq!(parse("\"open"), None);
        assert_eq!(parse("\"trailing\\"), None);
        assert!(matches!(
            try_parse("[1 2]"),
            Err(ParseError::UnexpectedChar { ch: '2', offset: 3 })
        ));
    }

    #[test]
    fn test_nul_terminates_input() {
        assert_eq!(
            parse_slice(b"[1]\0garbage"),
            Some(JsonValue::Array(vec![JsonValue::Number(1.0)]))
        );
        assert_eq!(try_parse_slice(b"\0[1]"), Err(ParseError::Empty));
    }

    #[test]
    fn test_invalid_utf8_in_slice() {
        assert_eq!(parse_slice(b"\"\xff\xfe\""), None);
    }

    #[test]
    fn test_depth_limit() {
        let deep = "[".repeat(MAX_DEPTH + 1) + &"]".repeat(MAX_DEPTH + 1);
        assert_eq!(try_parse(&deep), Err(ParseError::TooDeep(MAX_DEPTH)));

        let ok = "[".repeat(MAX_DEPTH) + &"]".repeat(MAX_DEPTH);
        assert!(parse(&ok).is_some());
    }

    #[test]
    fn test_failed_parses_release_partial_trees() {
        use crate::alloc_count::net_allocated;

        let docs = [
            "[1,2,",
            r#"{"files":[{"name":"a.wav","tags":["x","y"]},{"name":"#,
            r#"{"a":{"b":{"c":[1,2,{"d":"long string value"#,
            r#"[["nested"],{"k":"v"},"#,
            r#"{"token":"abc","user":}"#,
        ];
        for doc in docs {
            let (result, leaked) = net_allocated(|| parse(doc));
            assert_eq!(result, None, "{doc}");
            assert_eq!(leaked, 0, "{doc} leaked {leaked} bytes");
        }

        // 成功解析的树释放后同样归零
        let (len, leaked) = net_allocated(|| {
            let root = parse(r#"{"files":[{"name":"a.wav"},{"name":"b.wav"}]}"#);
            root.map(|r| array_length(r.get("files").unwrap_or(&JsonValue::Null)))
        });
        assert_eq!(len, Some(2));
        assert_eq!(leaked, 0);
    }

    #[test]
    fn test_every_truncation_fails_softly() {
        let doc = concat!(
            r#"{"token":"t\"k","files":[{"name":"x","size":12.5e2,"ok":true},"#,
            r#"null,[false]],"n":-1}"#
        );
        assert!(parse(doc).is_some());
        for cut in 0..doc.len() {
            // 所有前缀都不完整，均应返回 None 且不 panic
            assert_eq!(parse(&doc[..cut]), None, "prefix of length {cut} parsed");
        }
    }
}
