use crate::conf::Token;
use crate::err::ConfigErrorKind;

/// Splits one `;`-terminated configuration command into tokens.
pub fn tokenize(cmd: &str) -> Result<Vec<Token>, ConfigErrorKind> {
    let mut tokens = Vec::new();
    let mut chars = cmd.chars().peekable();

    while let Some(&c) = chars.peek() {
        if c.is_whitespace() {
            chars.next();
            continue;
        }
        match c {
            ':' => {
                chars.next();
                tokens.push(Token::Colon);
            }
            '.' => {
                chars.next();
                tokens.push(Token::Dot);
            }
            '{' => {
                chars.next();
                tokens.push(Token::LeftBrace);
            }
            '}' => {
                chars.next();
                tokens.push(Token::RightBrace);
            }
            '(' => {
                chars.next();
                tokens.push(Token::LeftParen);
            }
            ')' => {
                chars.next();
                tokens.push(Token::RightParen);
            }
            '-' => {
                chars.next();
                tokens.push(Token::Range);
            }
            '/' => {
                chars.next();
                tokens.push(Token::Slash);
            }
            '*' => {
                chars.next();
                tokens.push(Token::Star);
            }
            '|' => {
                chars.next();
                tokens.push(Token::Pipe);
            }
            '=' => {
                chars.next();
                if chars.next() == Some('=') && chars.next() == Some('>') {
                    tokens.push(Token::Arrow);
                } else {
                    return Err(ConfigErrorKind::UnexpectedChar('='));
                }
            }
            '"' => {
                chars.next();
                let mut s = String::new();
                for c in chars.by_ref() {
                    if c == '"' {
                        break;
                    }
                    s.push(c);
                }
                tokens.push(Token::Str(s));
            }
            c if is_word_char(c) => {
                let mut s = String::new();
                while let Some(&c) = chars.peek() {
                    if !is_word_char(c) {
                        break;
                    }
                    s.push(c);
                    chars.next();
                }
                tokens.push(keyword_or_str(s));
            }
            other => return Err(ConfigErrorKind::UnexpectedChar(other)),
        }
    }
    Ok(tokens)
}

fn is_word_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

fn keyword_or_str(s: String) -> Token {
    match s.to_lowercase().as_str() {
        "protocol" => Token::Protocol,
        "mldv1" => Token::MldV1,
        "mldv2" => Token::MldV2,
        "igmpv1" => Token::IgmpV1,
        "igmpv2" => Token::IgmpV2,
        "igmpv3" => Token::IgmpV3,
        "pinstance" => Token::Pinstance,
        "upstream" => Token::Upstream,
        "downstream" => Token::Downstream,
        "out" => Token::Out,
        "in" => Token::In,
        "blacklist" => Token::Blacklist,
        "whitelist" => Token::Whitelist,
        "rulematching" => Token::RuleMatching,
        "table" => Token::Table,
        "all" => Token::All,
        "first" => Token::First,
        "mutex" => Token::Mutex,
        "disable" => Token::Disable,
        _ => Token::Str(s),
    }
}
