// https://github.com/Geal/nom/blob/master/doc/choosing_a_combinator.md

use nom::{
    branch::alt,
    bytes::complete::{take_till, take_till1, take_while},
    character::complete::{char, one_of},
    combinator::{map, rest},
    multi::{many0, separated_list1},
    sequence::{delimited, preceded},
    IResult,
};

/// Strips leading and trailing ASCII whitespace from a raw input line.
pub(crate) fn trim(line: &[u8]) -> &[u8] {
    let start = line
        .iter()
        .position(|b| !b.is_ascii_whitespace())
        .unwrap_or(line.len());
    let end = line
        .iter()
        .rposition(|b| !b.is_ascii_whitespace())
        .map_or(start, |last| last + 1);
    &line[start..end]
}

/// Splits a command line into its pipeline segments.
///
/// Splitting happens before tokenization, so a `|` inside quotes still
/// separates segments. Empty segments are kept; they fail when dispatched.
pub(crate) fn split_pipeline(line: &[u8]) -> Vec<&[u8]> {
    let segments: IResult<&[u8], Vec<&[u8]>> =
        separated_list1(char('|'), take_till(|b: u8| b == b'|'))(line);

    match segments {
        Ok((_, segments)) => segments,
        Err(_) => vec![line],
    }
}

/// Splits one pipeline segment into its argument vector.
///
/// A token that opens with a quote runs to the next matching quote. Without a
/// closing quote the remainder of the segment becomes the last token.
pub(crate) fn tokenize(segment: &[u8]) -> Vec<&[u8]> {
    match many0(argument)(segment) {
        Ok((_, tokens)) => tokens,
        Err(_) => Vec::new(),
    }
}

fn is_separator(b: u8) -> bool {
    matches!(b, b' ' | b'\t' | b'\r' | b'\n')
}

fn argument(input: &[u8]) -> IResult<&[u8], &[u8]> {
    preceded(
        take_while(is_separator),
        alt((quoted(b'"'), quoted(b'\''), unterminated, bare)),
    )(input)
}

fn quoted<'a>(quote: u8) -> impl FnMut(&'a [u8]) -> IResult<&'a [u8], &'a [u8]> {
    delimited(
        char(quote as char),
        take_till(move |b: u8| b == quote),
        char(quote as char),
    )
}

fn unterminated(input: &[u8]) -> IResult<&[u8], &[u8]> {
    map(preceded(one_of("\"'"), rest), trim_separators_end)(input)
}

fn trim_separators_end(token: &[u8]) -> &[u8] {
    let end = token
        .iter()
        .rposition(|b| !is_separator(*b))
        .map_or(0, |last| last + 1);
    &token[..end]
}

fn bare(input: &[u8]) -> IResult<&[u8], &[u8]> {
    take_till1(is_separator)(input)
}

#[cfg(test)]
mod tests {
    use std::str;

    fn tokens(segment: &str) -> Vec<&str> {
        super::tokenize(segment.as_bytes())
            .into_iter()
            .map(|token| str::from_utf8(token).unwrap())
            .collect()
    }

    fn segments(line: &str) -> Vec<&str> {
        super::split_pipeline(line.as_bytes())
            .into_iter()
            .map(|segment| str::from_utf8(segment).unwrap())
            .collect()
    }

    #[test]
    fn test_tokenize_plain_words() {
        assert_eq!(tokens("ls -l  /tmp"), vec!["ls", "-l", "/tmp"]);
        assert_eq!(tokens("\tgrep\tfoo "), vec!["grep", "foo"]);
    }

    #[test]
    fn test_tokenize_empty() {
        assert!(tokens("").is_empty());
        assert!(tokens("   \t ").is_empty());
    }

    #[test]
    fn test_tokenize_quoted() {
        assert_eq!(
            tokens("grep \"hello world\" notes.txt"),
            vec!["grep", "hello world", "notes.txt"]
        );
        assert_eq!(tokens("echo 'a  b' c"), vec!["echo", "a  b", "c"]);
        assert_eq!(tokens("echo \"\""), vec!["echo", ""]);
    }

    #[test]
    fn test_tokenize_mixed_quotes() {
        assert_eq!(
            tokens("echo \"it's\" 'say \"hi\"'"),
            vec!["echo", "it's", "say \"hi\""]
        );
    }

    #[test]
    fn test_tokenize_unterminated_quote() {
        assert_eq!(tokens("echo \"a b"), vec!["echo", "a b"]);
        assert_eq!(tokens("echo 'x y \"z\" w  "), vec!["echo", "x y \"z\" w"]);
    }

    #[test]
    fn test_tokenize_text_after_closing_quote_starts_new_token() {
        assert_eq!(tokens("echo \"ab\"cd"), vec!["echo", "ab", "cd"]);
    }

    #[test]
    fn test_tokenize_keeps_non_utf8_bytes() {
        assert_eq!(
            super::tokenize(b"printf ok\xff \"\xfe x\""),
            vec![&b"printf"[..], &b"ok\xff"[..], &b"\xfe x"[..]]
        );
    }

    #[test]
    fn test_split_pipeline() {
        assert_eq!(segments("ls"), vec!["ls"]);
        assert_eq!(
            segments("history | grep cd | wc -l"),
            vec!["history ", " grep cd ", " wc -l"]
        );
    }

    #[test]
    fn test_split_pipeline_keeps_empty_segments() {
        assert_eq!(segments("a||b"), vec!["a", "", "b"]);
        assert_eq!(segments("a |"), vec!["a ", ""]);
        assert_eq!(segments(""), vec![""]);
    }

    #[test]
    fn test_split_pipeline_ignores_quotes() {
        assert_eq!(segments("echo \"a|b\""), vec!["echo \"a", "b\""]);
    }

    #[test]
    fn test_trim() {
        assert_eq!(super::trim(b"  ls -l \n"), b"ls -l");
        assert_eq!(super::trim(b"\t \r\n"), b"");
        assert_eq!(super::trim(b""), b"");
        assert_eq!(super::trim(b" \xff "), b"\xff");
    }
}
