//! AQL 解析引擎
//!
//! 引擎驱动 [`Grammar`] 在输入文本上回溯匹配：
//!
//! - Fork 节点按声明顺序尝试每个子节点，收集所有匹配成功的候选延续
//!   （允许歧义，一个节点可以用多种方式匹配同一段输入）；
//! - Sequence 节点把上一个子节点剩下的输入喂给下一个子节点，任一子
//!   节点失败则整条路径失败；
//! - 只有把输入完整消费掉（余量为零，允许尾部空白）的推导才被接受；
//!   若有多条完整推导，按声明顺序最早的获胜（深度优先顺序即声明顺序）。
//!
//! 全部失败时，错误位置取所有尝试路径中推进最深的那个字节偏移，
//! 而不是笼统地报在位置 0。

use crate::error::{AqlError, Result};
use crate::grammar::{Grammar, GrammarNode, TokenTag, COMPARATORS};

/// One semantic token produced by a visible grammar node.
#[derive(Debug, Clone, PartialEq)]
pub struct ParseToken {
    pub tag: TokenTag,
    /// Matched text with quoting stripped (field names, values, operators).
    pub text: String,
    /// Byte offset of the match in the original input.
    pub pos: usize,
}

/// 单次解析的可变游标状态：只负责记录诊断用的最深推进位置。
#[derive(Debug, Default)]
struct ParseContext {
    deepest: usize,
}

impl ParseContext {
    fn note(&mut self, pos: usize) {
        if pos > self.deepest {
            self.deepest = pos;
        }
    }
}

/// A candidate continuation: how far this path consumed, and the tokens
/// it produced along the way.
type Candidate = (usize, Vec<ParseToken>);

/// Parse `input` against `grammar`, returning the token stream of the
/// winning derivation.
pub fn parse(grammar: &Grammar, input: &str) -> Result<Vec<ParseToken>> {
    let mut ctx = ParseContext::default();
    let candidates = consume(grammar, grammar.root(), input, 0, &mut ctx);

    // 第一条完整消费输入的推导获胜
    for (pos, tokens) in candidates {
        if skip_ws(input, pos) == input.len() {
            tracing::trace!(tokens = tokens.len(), "accepted derivation");
            return Ok(tokens);
        }
    }

    Err(AqlError::Syntax {
        position: ctx.deepest,
        message: "no derivation consumes the entire input".to_string(),
    })
}

/// 在 `pos` 处尝试节点 `id`，返回所有候选延续（可能为空）。
fn consume(
    grammar: &Grammar,
    id: usize,
    input: &str,
    pos: usize,
    ctx: &mut ParseContext,
) -> Vec<Candidate> {
    match grammar.node(id) {
        GrammarNode::Sequence(children) => {
            let mut states: Vec<Candidate> = vec![(pos, Vec::new())];
            for &child in children {
                let mut next = Vec::new();
                for (p, toks) in &states {
                    for (p2, t2) in consume(grammar, child, input, *p, ctx) {
                        let mut merged = toks.clone();
                        merged.extend(t2);
                        next.push((p2, merged));
                    }
                }
                if next.is_empty() {
                    return Vec::new();
                }
                states = next;
            }
            states
        }
        GrammarNode::Fork(children) => {
            let mut out = Vec::new();
            for &child in children {
                out.extend(consume(grammar, child, input, pos, ctx));
            }
            out
        }
        GrammarNode::Empty => vec![(pos, Vec::new())],
        GrammarNode::Literal { text, emit } => {
            let p = skip_ws(input, pos);
            if input[p..].starts_with(text) {
                let end = p + text.len();
                ctx.note(end);
                // 纯终结符不进入结果流
                let tokens = match emit {
                    Some(tag) if !grammar.node(id).is_leaf_terminal() => vec![ParseToken {
                        tag: *tag,
                        text: (*text).to_string(),
                        pos: p,
                    }],
                    _ => Vec::new(),
                };
                vec![(end, tokens)]
            } else {
                ctx.note(p);
                Vec::new()
            }
        }
        GrammarNode::Ident { emit } => {
            let p = skip_ws(input, pos);
            match read_ident(input, p) {
                Some(end) => {
                    ctx.note(end);
                    vec![(
                        end,
                        vec![ParseToken {
                            tag: *emit,
                            text: input[p..end].to_string(),
                            pos: p,
                        }],
                    )]
                }
                None => {
                    ctx.note(p);
                    Vec::new()
                }
            }
        }
        GrammarNode::FieldRef => {
            let p = skip_ws(input, pos);
            match read_quoted(input, p) {
                Some((inner, end)) if is_field_name(&inner) => {
                    ctx.note(end);
                    vec![(
                        end,
                        vec![ParseToken {
                            tag: TokenTag::Field,
                            text: inner,
                            pos: p,
                        }],
                    )]
                }
                _ => {
                    ctx.note(p);
                    Vec::new()
                }
            }
        }
        GrammarNode::Comparator => {
            let p = skip_ws(input, pos);
            match read_quoted(input, p) {
                Some((inner, end)) if COMPARATORS.contains(&inner.as_str()) => {
                    ctx.note(end);
                    vec![(
                        end,
                        vec![ParseToken {
                            tag: TokenTag::Comparator,
                            text: inner,
                            pos: p,
                        }],
                    )]
                }
                _ => {
                    ctx.note(p);
                    Vec::new()
                }
            }
        }
        GrammarNode::ValueLiteral => {
            let p = skip_ws(input, pos);
            let candidate = read_value(input, p);
            match candidate {
                Some((tag, text, end)) => {
                    ctx.note(end);
                    vec![(end, vec![ParseToken { tag, text, pos: p }])]
                }
                None => {
                    ctx.note(p);
                    Vec::new()
                }
            }
        }
        GrammarNode::IntegerLit { emit } => {
            let p = skip_ws(input, pos);
            let end = p + input[p..]
                .bytes()
                .take_while(|b| b.is_ascii_digit())
                .count();
            if end > p {
                ctx.note(end);
                vec![(
                    end,
                    vec![ParseToken {
                        tag: *emit,
                        text: input[p..end].to_string(),
                        pos: p,
                    }],
                )]
            } else {
                ctx.note(p);
                Vec::new()
            }
        }
        GrammarNode::Placeholder => unreachable!("placeholder node reached during parse"),
    }
}

fn skip_ws(input: &str, mut pos: usize) -> usize {
    while let Some(c) = input[pos..].chars().next() {
        if c.is_whitespace() {
            pos += c.len_utf8();
        } else {
            break;
        }
    }
    pos
}

/// `[A-Za-z_][A-Za-z0-9_]*`，返回结束偏移。
fn read_ident(input: &str, pos: usize) -> Option<usize> {
    let bytes = input.as_bytes();
    let first = *bytes.get(pos)?;
    if !(first.is_ascii_alphabetic() || first == b'_') {
        return None;
    }
    let mut end = pos + 1;
    while end < bytes.len() && (bytes[end].is_ascii_alphanumeric() || bytes[end] == b'_') {
        end += 1;
    }
    Some(end)
}

/// 读取带引号字符串，支持 `\"` 与 `\\` 转义；返回（去引号内容, 结束偏移）。
fn read_quoted(input: &str, pos: usize) -> Option<(String, usize)> {
    let mut chars = input[pos..].char_indices();
    match chars.next() {
        Some((_, '"')) => {}
        _ => return None,
    }
    let mut inner = String::new();
    let mut escaped = false;
    for (i, c) in chars {
        if escaped {
            inner.push(c);
            escaped = false;
        } else if c == '\\' {
            escaped = true;
        } else if c == '"' {
            return Some((inner, pos + i + c.len_utf8()));
        } else {
            inner.push(c);
        }
    }
    None
}

fn is_field_name(s: &str) -> bool {
    !s.is_empty()
        && !s.starts_with('$')
        && s.chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'))
}

/// 字面值：字符串 / 整数（可带负号）/ null。
fn read_value(input: &str, pos: usize) -> Option<(TokenTag, String, usize)> {
    if let Some((inner, end)) = read_quoted(input, pos) {
        return Some((TokenTag::ValueStr, inner, end));
    }

    let bytes = input.as_bytes();
    let mut end = pos;
    if bytes.get(end) == Some(&b'-') {
        end += 1;
    }
    let digits_start = end;
    while end < bytes.len() && bytes[end].is_ascii_digit() {
        end += 1;
    }
    if end > digits_start {
        return Some((TokenTag::ValueInt, input[pos..end].to_string(), end));
    }

    if input[pos..].starts_with("null") {
        let after = pos + 4;
        // "null" 必须是完整单词
        let boundary = input[after..]
            .chars()
            .next()
            .map_or(true, |c| !c.is_ascii_alphanumeric() && c != '_');
        if boundary {
            return Some((TokenTag::ValueNull, "null".to_string(), after));
        }
    }
    None
}
