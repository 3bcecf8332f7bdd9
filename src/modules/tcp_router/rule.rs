//! Routing rule grammar and matcher tree.
//!
//! A rule is a boolean expression over atomic matchers, e.g.
//! ``HostSNI(`foo.example`) && !ClientIP(`10.0.0.0/8`)``. Matcher names
//! are case-insensitive; `!` binds tighter than `&&`, which binds tighter
//! than `||`; parentheses group. Arguments are quoted with backticks,
//! single or double quotes.
//!
//! Trees are immutable once built and matching is pure: the same
//! [`ConnData`] always yields the same answer.

use std::net::{IpAddr, SocketAddr};

use super::error::RuleError;

/// Per-connection routing facts, built once before matching.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnData {
    /// Lower-cased SNI server name, empty when none was presented.
    pub(crate) server_name: String,

    /// Textual remote IP, without the port.
    pub(crate) remote_ip: String,
}

impl ConnData {
    /// Build connection data from the sniffed server name and the peer
    /// address of the accepted connection.
    #[must_use]
    pub fn new(server_name: &str, peer: SocketAddr) -> Self {
        Self {
            server_name: server_name.to_ascii_lowercase(),
            remote_ip: peer.ip().to_string(),
        }
    }

    /// The server name announced in the ClientHello, lower-cased.
    #[must_use]
    pub fn server_name(&self) -> &str {
        &self.server_name
    }

    /// The remote IP the connection originates from.
    #[must_use]
    pub fn remote_ip(&self) -> &str {
        &self.remote_ip
    }
}

/// A parsed IP or CIDR block argument of a `ClientIP` matcher.
#[derive(Debug, Clone)]
struct IpRange {
    network: IpAddr,
    prefix: u8,
}

impl IpRange {
    fn parse(value: &str) -> Result<Self, RuleError> {
        let (ip_str, prefix) = match value.split_once('/') {
            Some((ip, len)) => {
                let prefix: u8 = len.parse().map_err(|_| RuleError::InvalidIp {
                    value: value.to_string(),
                })?;
                (ip, Some(prefix))
            },
            None => (value, None),
        };

        let network: IpAddr = ip_str.parse().map_err(|_| RuleError::InvalidIp {
            value: value.to_string(),
        })?;

        let max_prefix = if network.is_ipv4() { 32 } else { 128 };
        let prefix = prefix.unwrap_or(max_prefix);
        if prefix > max_prefix {
            return Err(RuleError::InvalidIp {
                value: value.to_string(),
            });
        }

        Ok(Self { network, prefix })
    }

    fn contains(&self, ip: IpAddr) -> bool {
        match (self.network, ip) {
            (IpAddr::V4(net), IpAddr::V4(host)) => {
                let mask = if self.prefix == 0 {
                    0
                } else {
                    u32::MAX << (32 - u32::from(self.prefix))
                };
                (u32::from(net) & mask) == (u32::from(host) & mask)
            },
            (IpAddr::V6(net), IpAddr::V6(host)) => {
                let mask = if self.prefix == 0 {
                    0
                } else {
                    u128::MAX << (128 - u32::from(self.prefix))
                };
                (u128::from(net) & mask) == (u128::from(host) & mask)
            },
            _ => false,
        }
    }
}

/// An atomic predicate, bound to its static arguments at build time.
#[derive(Debug, Clone)]
enum Matcher {
    HostSni { hosts: Vec<String>, wildcard: bool },
    ClientIp { ranges: Vec<IpRange> },
}

impl Matcher {
    fn host_sni(args: &[String]) -> Result<Self, RuleError> {
        if args.is_empty() || args.iter().all(|a| a.is_empty()) {
            return Err(RuleError::EmptyArgs { matcher: "HostSNI" });
        }

        let mut hosts = Vec::new();
        let mut wildcard = false;
        for arg in args {
            if arg == "*" {
                wildcard = true;
                continue;
            }
            if !arg.is_ascii() {
                return Err(RuleError::InvalidHost { host: arg.clone() });
            }
            if arg.contains('*') {
                // Subdomain wildcards are not supported at this layer.
                return Err(RuleError::InvalidHost { host: arg.clone() });
            }
            hosts.push(arg.to_ascii_lowercase().trim_end_matches('.').to_string());
        }

        Ok(Self::HostSni { hosts, wildcard })
    }

    fn client_ip(args: &[String]) -> Result<Self, RuleError> {
        if args.is_empty() || args.iter().all(|a| a.is_empty()) {
            return Err(RuleError::EmptyArgs { matcher: "ClientIP" });
        }

        let ranges = args
            .iter()
            .map(|arg| IpRange::parse(arg))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self::ClientIp { ranges })
    }

    fn matches(&self, meta: &ConnData) -> bool {
        match self {
            Self::HostSni { hosts, wildcard } => {
                // A lone `*` matches everything, including the absence of
                // a server name. Combined with other hosts, it only
                // matches connections that presented one.
                if *wildcard && hosts.is_empty() {
                    return true;
                }
                let name = meta.server_name.trim_end_matches('.');
                if name.is_empty() {
                    return false;
                }
                *wildcard || hosts.iter().any(|h| h == name)
            },
            Self::ClientIp { ranges } => {
                let Ok(ip) = meta.remote_ip.parse::<IpAddr>() else {
                    return false;
                };
                ranges.iter().any(|r| r.contains(ip))
            },
        }
    }
}

/// A boolean expression tree over atomic matchers, immutable once built.
#[derive(Debug, Clone)]
pub struct MatchersTree {
    node: Node,
}

#[derive(Debug, Clone)]
enum Node {
    Leaf(Matcher),
    Not(Box<Node>),
    And(Box<Node>, Box<Node>),
    Or(Box<Node>, Box<Node>),
}

impl Node {
    fn matches(&self, meta: &ConnData) -> bool {
        match self {
            Self::Leaf(matcher) => matcher.matches(meta),
            Self::Not(child) => !child.matches(meta),
            Self::And(left, right) => left.matches(meta) && right.matches(meta),
            Self::Or(left, right) => left.matches(meta) || right.matches(meta),
        }
    }
}

impl MatchersTree {
    /// Evaluate the tree against connection metadata. Pure and total.
    #[must_use]
    pub fn matches(&self, meta: &ConnData) -> bool {
        self.node.matches(meta)
    }
}

/// Parse a rule expression into a matcher tree.
///
/// # Errors
///
/// Returns a [`RuleError`] identifying the offending fragment when the
/// expression is syntactically malformed, names an unknown matcher, or
/// carries invalid arguments.
pub fn parse(rule: &str) -> Result<MatchersTree, RuleError> {
    let tokens = tokenize(rule)?;
    let mut parser = Parser { tokens, pos: 0 };
    let node = parser.parse_or()?;
    if parser.pos != parser.tokens.len() {
        return Err(RuleError::Syntax {
            message: format!("unexpected trailing input in rule {rule:?}"),
        });
    }
    Ok(MatchersTree { node })
}

/// Extract the `HostSNI` domains named anywhere in a rule, lower-cased,
/// excluding the `*` wildcard.
///
/// This is a lenient scan used for certificate-domain plumbing: an empty
/// or absent `HostSNI` clause yields no domains rather than an error.
///
/// # Errors
///
/// Returns a [`RuleError`] only when the rule cannot be tokenized.
pub fn parse_host_sni(rule: &str) -> Result<Vec<String>, RuleError> {
    let tokens = tokenize(rule)?;
    let mut domains = Vec::new();

    let mut i = 0;
    while i < tokens.len() {
        if let Token::Ident(name) = &tokens[i] {
            if name.eq_ignore_ascii_case("hostsni") {
                let mut j = i + 1;
                if matches!(tokens.get(j), Some(Token::LParen)) {
                    j += 1;
                    while let Some(tok) = tokens.get(j) {
                        match tok {
                            Token::Arg(arg) if arg != "*" => {
                                domains.push(arg.to_ascii_lowercase());
                            },
                            Token::RParen => break,
                            _ => {},
                        }
                        j += 1;
                    }
                }
                i = j;
            }
        }
        i += 1;
    }

    Ok(domains)
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Ident(String),
    Arg(String),
    LParen,
    RParen,
    Comma,
    And,
    Or,
    Not,
}

fn tokenize(rule: &str) -> Result<Vec<Token>, RuleError> {
    let mut tokens = Vec::new();
    let mut chars = rule.chars().peekable();

    while let Some(&c) = chars.peek() {
        match c {
            ' ' | '\t' | '\r' | '\n' => {
                chars.next();
            },
            '(' => {
                chars.next();
                tokens.push(Token::LParen);
            },
            ')' => {
                chars.next();
                tokens.push(Token::RParen);
            },
            ',' => {
                chars.next();
                tokens.push(Token::Comma);
            },
            '!' => {
                chars.next();
                tokens.push(Token::Not);
            },
            '&' => {
                chars.next();
                if chars.next() != Some('&') {
                    return Err(RuleError::Syntax {
                        message: format!("single '&' in rule {rule:?}"),
                    });
                }
                tokens.push(Token::And);
            },
            '|' => {
                chars.next();
                if chars.next() != Some('|') {
                    return Err(RuleError::Syntax {
                        message: format!("single '|' in rule {rule:?}"),
                    });
                }
                tokens.push(Token::Or);
            },
            '`' | '\'' | '"' => {
                chars.next();
                let mut arg = String::new();
                loop {
                    match chars.next() {
                        Some(q) if q == c => break,
                        Some(other) => arg.push(other),
                        None => {
                            return Err(RuleError::Syntax {
                                message: format!("unterminated quote in rule {rule:?}"),
                            });
                        },
                    }
                }
                tokens.push(Token::Arg(arg));
            },
            c if c.is_ascii_alphanumeric() || c == '_' => {
                let mut ident = String::new();
                while let Some(&c) = chars.peek() {
                    if c.is_ascii_alphanumeric() || c == '_' {
                        ident.push(c);
                        chars.next();
                    } else {
                        break;
                    }
                }
                tokens.push(Token::Ident(ident));
            },
            other => {
                return Err(RuleError::Syntax {
                    message: format!("unexpected character {other:?} in rule {rule:?}"),
                });
            },
        }
    }

    Ok(tokens)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let tok = self.tokens.get(self.pos).cloned();
        if tok.is_some() {
            self.pos += 1;
        }
        tok
    }

    fn expect(&mut self, expected: &Token, context: &str) -> Result<(), RuleError> {
        match self.next() {
            Some(ref tok) if tok == expected => Ok(()),
            other => Err(RuleError::Syntax {
                message: format!("expected {expected:?} {context}, found {other:?}"),
            }),
        }
    }

    fn parse_or(&mut self) -> Result<Node, RuleError> {
        let mut left = self.parse_and()?;
        while matches!(self.peek(), Some(Token::Or)) {
            self.next();
            let right = self.parse_and()?;
            left = Node::Or(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Node, RuleError> {
        let mut left = self.parse_unary()?;
        while matches!(self.peek(), Some(Token::And)) {
            self.next();
            let right = self.parse_unary()?;
            left = Node::And(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_unary(&mut self) -> Result<Node, RuleError> {
        match self.peek() {
            Some(Token::Not) => {
                self.next();
                let child = self.parse_unary()?;
                Ok(Node::Not(Box::new(child)))
            },
            Some(Token::LParen) => {
                self.next();
                let inner = self.parse_or()?;
                self.expect(&Token::RParen, "to close group")?;
                Ok(inner)
            },
            _ => self.parse_matcher(),
        }
    }

    fn parse_matcher(&mut self) -> Result<Node, RuleError> {
        let name = match self.next() {
            Some(Token::Ident(name)) => name,
            other => {
                return Err(RuleError::Syntax {
                    message: format!("expected a matcher, found {other:?}"),
                });
            },
        };

        self.expect(&Token::LParen, "after matcher name")?;

        let mut args = Vec::new();
        loop {
            match self.next() {
                Some(Token::Arg(arg)) => {
                    args.push(arg);
                    match self.next() {
                        Some(Token::Comma) => {},
                        Some(Token::RParen) => break,
                        other => {
                            return Err(RuleError::Syntax {
                                message: format!("expected ',' or ')', found {other:?}"),
                            });
                        },
                    }
                },
                Some(Token::RParen) => break,
                other => {
                    return Err(RuleError::Syntax {
                        message: format!("expected an argument, found {other:?}"),
                    });
                },
            }
        }

        let matcher = if name.eq_ignore_ascii_case("hostsni") {
            Matcher::host_sni(&args)?
        } else if name.eq_ignore_ascii_case("clientip") {
            Matcher::client_ip(&args)?
        } else {
            return Err(RuleError::UnknownMatcher { name });
        };

        Ok(Node::Leaf(matcher))
    }
}
