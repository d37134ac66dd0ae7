//! AQL 语法树定义
//!
//! 语法以节点池（arena）的形式表示：每个节点是一个 [`GrammarNode`]，
//! 子节点通过 [`NodeId`] 索引引用。criteria 与 `$and`/`$or` 分组相互
//! 嵌套构成环，因此构建分两步：先用 `placeholder()` 占位，再在第二遍
//! `fill()` 中接线。构建完成后语法不可变，可在线程间共享。
//!
//! 进程级共享实例通过 [`Grammar::shared`] 延迟构建并缓存
//! （`OnceLock` 保证并发首次使用时不会观察到接线未完成的语法）；
//! 测试可以用 [`Grammar::build`] 构建独立实例。
//!
//! ## 文法（概念 EBNF）
//!
//! ```text
//! query      := domain '.' 'find' '(' [criteria [',' fieldList]] ')' tail*
//! tail       := '.include' '(' fieldList ')'
//!             | '.sort' '(' '{' '"$asc"'|'"$desc"' ':' '[' fieldList ']' '}' ')'
//!             | '.limit' '(' integer ')'
//!             | '.offset' '(' integer ')'
//! criteria   := '{' [critItem (',' critItem)*] '}'
//! critItem   := '"$and"' ':' '[' criteria (',' criteria)* ']'
//!             | '"$or"'  ':' '[' criteria (',' criteria)* ']'
//!             | '"$not"' ':' criteria
//!             | '"' field '"' ':' ( value | '{' '"' comparator '"' ':' value '}' )
//! ```

use std::sync::OnceLock;

/// Index of a grammar node inside the arena.
pub type NodeId = usize;

/// Semantic tag attached to tokens produced by visible grammar nodes.
/// Terminal punctuation ("(", ":", ",", …) carries no tag and is excluded
/// from the result token stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenTag {
    Domain,
    CriteriaOpen,
    CriteriaClose,
    ListOpen,
    ListClose,
    AndOp,
    OrOp,
    NotOp,
    Field,
    Comparator,
    ValueStr,
    ValueInt,
    ValueNull,
    IncludeKw,
    SortAsc,
    SortDesc,
    LimitKw,
    OffsetKw,
    Integer,
}

/// 一条文法产生式。
#[derive(Debug)]
pub enum GrammarNode {
    /// 依次匹配每个子节点；任一子节点失败则该路径失败。
    Sequence(Vec<NodeId>),
    /// 按声明顺序尝试每个子节点，收集所有匹配到的候选延续。
    Fork(Vec<NodeId>),
    /// 匹配空串。与 Fork 组合表达可选成分。
    Empty,
    /// 固定字面量。`emit` 为 None 时是纯终结符，不进入结果流。
    Literal {
        text: &'static str,
        emit: Option<TokenTag>,
    },
    /// 裸标识符（域名关键字的位置接受任意标识符，未知域名在
    /// 模型构建阶段报 UnknownDomain，而不是语法错误）。
    Ident { emit: TokenTag },
    /// 带引号的字段名，允许点号跨域引用（如 `"stat.downloads"`）。
    /// 以 `$` 开头的内容不是字段名。
    FieldRef,
    /// 带引号的比较运算符（`"$eq"` 等）。
    Comparator,
    /// 字面值：带引号字符串 / 整数 / null。
    ValueLiteral,
    /// 不带引号的非负整数（limit/offset 的参数）。
    IntegerLit { emit: TokenTag },
    /// 占位节点，必须在第二遍接线中被 `fill()` 替换。
    Placeholder,
}

impl GrammarNode {
    /// Terminals carry no semantic payload and are excluded from the
    /// result token stream.
    pub fn is_leaf_terminal(&self) -> bool {
        matches!(
            self,
            GrammarNode::Empty | GrammarNode::Literal { emit: None, .. }
        )
    }
}

/// Comparator keywords accepted by the [`GrammarNode::Comparator`] node.
pub const COMPARATORS: &[&str] = &[
    "$eq", "$ne", "$gt", "$gte", "$lt", "$lte", "$match", "$nmatch",
];

/// The immutable AQL grammar: a node arena plus the root production.
#[derive(Debug)]
pub struct Grammar {
    nodes: Vec<GrammarNode>,
    root: NodeId,
}

impl Grammar {
    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn node(&self, id: NodeId) -> &GrammarNode {
        &self.nodes[id]
    }

    /// 进程级共享语法，首次使用时构建并缓存。
    pub fn shared() -> &'static Grammar {
        static SHARED: OnceLock<Grammar> = OnceLock::new();
        SHARED.get_or_init(Grammar::build)
    }

    /// 构建一个独立的语法实例（`shared()` 内部也走这里）。
    pub fn build() -> Grammar {
        let mut g = Arena::default();

        // 终结符
        let dot = g.lit(".");
        let colon = g.lit(":");
        let comma = g.lit(",");
        let lparen = g.lit("(");
        let rparen = g.lit(")");
        let lbrace = g.lit("{");
        let rbrace = g.lit("}");

        // 环上的节点先占位
        let criteria = g.placeholder();
        let crit_list = g.placeholder();
        let criteria_list = g.placeholder();
        let field_list = g.placeholder();
        let tails = g.placeholder();

        let empty = g.add(GrammarNode::Empty);
        let field = g.add(GrammarNode::FieldRef);
        let value = g.add(GrammarNode::ValueLiteral);
        let comparator = g.add(GrammarNode::Comparator);

        // "field": value | "field": {"$op": value}
        let cmp_leaf = {
            let seq = vec![lbrace, comparator, colon, value, rbrace];
            g.add(GrammarNode::Sequence(seq))
        };
        let field_value = g.fork(vec![value, cmp_leaf]);
        let field_crit = g.seq(vec![field, colon, field_value]);

        // "$and": [criteria, ...] / "$or": [...] / "$not": criteria
        let list_open = g.tok_lit("[", TokenTag::ListOpen);
        let list_close = g.tok_lit("]", TokenTag::ListClose);
        let and_kw = g.tok_lit("\"$and\"", TokenTag::AndOp);
        let or_kw = g.tok_lit("\"$or\"", TokenTag::OrOp);
        let not_kw = g.tok_lit("\"$not\"", TokenTag::NotOp);
        let and_group = g.seq(vec![and_kw, colon, list_open, criteria_list, list_close]);
        let or_group = g.seq(vec![or_kw, colon, list_open, criteria_list, list_close]);
        let not_group = g.seq(vec![not_kw, colon, criteria]);

        let crit_item = g.fork(vec![and_group, or_group, not_group, field_crit]);

        // crit_list := crit_item (',' crit_item)*
        let crit_list_rest = g.seq(vec![comma, crit_list]);
        let crit_list_tail = g.fork(vec![crit_list_rest, empty]);
        g.fill(crit_list, GrammarNode::Sequence(vec![crit_item, crit_list_tail]));

        // criteria := '{' [crit_list] '}'
        let crit_open = g.tok_lit("{", TokenTag::CriteriaOpen);
        let crit_close = g.tok_lit("}", TokenTag::CriteriaClose);
        let crit_body = g.fork(vec![crit_list, empty]);
        g.fill(
            criteria,
            GrammarNode::Sequence(vec![crit_open, crit_body, crit_close]),
        );

        // criteria_list := criteria (',' criteria)*
        let criteria_list_rest = g.seq(vec![comma, criteria_list]);
        let criteria_list_tail = g.fork(vec![criteria_list_rest, empty]);
        g.fill(
            criteria_list,
            GrammarNode::Sequence(vec![criteria, criteria_list_tail]),
        );

        // field_list := field (',' field)*
        let field_list_rest = g.seq(vec![comma, field_list]);
        let field_list_tail = g.fork(vec![field_list_rest, empty]);
        g.fill(
            field_list,
            GrammarNode::Sequence(vec![field, field_list_tail]),
        );

        // 尾部链：.include(...) .sort(...) .limit(n) .offset(n)
        let integer = g.add(GrammarNode::IntegerLit {
            emit: TokenTag::Integer,
        });
        let include_kw = g.tok_lit("include", TokenTag::IncludeKw);
        let include = g.seq(vec![dot, include_kw, lparen, field_list, rparen]);

        let asc_kw = g.tok_lit("\"$asc\"", TokenTag::SortAsc);
        let desc_kw = g.tok_lit("\"$desc\"", TokenTag::SortDesc);
        let sort_dir = g.fork(vec![asc_kw, desc_kw]);
        let sort_kw = g.lit("sort");
        let sort = g.seq(vec![
            dot, sort_kw, lparen, lbrace, sort_dir, colon, list_open, field_list, list_close,
            rbrace, rparen,
        ]);

        let limit_kw = g.tok_lit("limit", TokenTag::LimitKw);
        let limit = g.seq(vec![dot, limit_kw, lparen, integer, rparen]);
        let offset_kw = g.tok_lit("offset", TokenTag::OffsetKw);
        let offset = g.seq(vec![dot, offset_kw, lparen, integer, rparen]);

        let tail = g.fork(vec![include, sort, limit, offset]);
        let tails_rest = g.seq(vec![tail, tails]);
        g.fill(tails, GrammarNode::Fork(vec![tails_rest, empty]));

        // find 参数：空 | criteria | criteria ',' projection
        let projection = g.seq(vec![comma, field_list]);
        let projection_opt = g.fork(vec![projection, empty]);
        let find_args = g.seq(vec![criteria, projection_opt]);
        let find_body = g.fork(vec![find_args, empty]);

        let domain = g.add(GrammarNode::Ident {
            emit: TokenTag::Domain,
        });
        let find_kw = g.lit("find");
        let root = g.seq(vec![
            domain, dot, find_kw, lparen, find_body, rparen, tails,
        ]);

        g.finish(root)
    }
}

/// 构建期的可变节点池。
#[derive(Default)]
struct Arena {
    nodes: Vec<GrammarNode>,
}

impl Arena {
    fn add(&mut self, node: GrammarNode) -> NodeId {
        self.nodes.push(node);
        self.nodes.len() - 1
    }

    fn placeholder(&mut self) -> NodeId {
        self.add(GrammarNode::Placeholder)
    }

    /// 第二遍接线：把占位节点替换成真实产生式。
    fn fill(&mut self, id: NodeId, node: GrammarNode) {
        debug_assert!(matches!(self.nodes[id], GrammarNode::Placeholder));
        self.nodes[id] = node;
    }

    fn lit(&mut self, text: &'static str) -> NodeId {
        self.add(GrammarNode::Literal { text, emit: None })
    }

    fn tok_lit(&mut self, text: &'static str, tag: TokenTag) -> NodeId {
        self.add(GrammarNode::Literal {
            text,
            emit: Some(tag),
        })
    }

    fn seq(&mut self, children: Vec<NodeId>) -> NodeId {
        self.add(GrammarNode::Sequence(children))
    }

    fn fork(&mut self, children: Vec<NodeId>) -> NodeId {
        self.add(GrammarNode::Fork(children))
    }

    fn finish(self, root: NodeId) -> Grammar {
        // 所有占位节点都必须已接线
        debug_assert!(
            !self
                .nodes
                .iter()
                .any(|n| matches!(n, GrammarNode::Placeholder)),
            "grammar contains unwired placeholder nodes"
        );
        Grammar {
            nodes: self.nodes,
            root,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_has_no_placeholders() {
        let g = Grammar::build();
        for id in 0..g.nodes.len() {
            assert!(
                !matches!(g.node(id), GrammarNode::Placeholder),
                "node {} left unwired",
                id
            );
        }
    }

    #[test]
    fn test_shared_is_memoized() {
        let a = Grammar::shared() as *const Grammar;
        let b = Grammar::shared() as *const Grammar;
        assert_eq!(a, b);
    }

    #[test]
    fn test_shared_safe_under_concurrent_first_use() {
        let handles: Vec<_> = (0..8)
            .map(|_| std::thread::spawn(|| Grammar::shared() as *const Grammar as usize))
            .collect();
        let addrs: Vec<usize> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert!(addrs.windows(2).all(|w| w[0] == w[1]));
    }

    #[test]
    fn test_terminal_classification() {
        let lit = GrammarNode::Literal {
            text: "(",
            emit: None,
        };
        assert!(lit.is_leaf_terminal());

        let visible = GrammarNode::Literal {
            text: "{",
            emit: Some(TokenTag::CriteriaOpen),
        };
        assert!(!visible.is_leaf_terminal());
        assert!(GrammarNode::Empty.is_leaf_terminal());
        assert!(!GrammarNode::FieldRef.is_leaf_terminal());
    }
}
