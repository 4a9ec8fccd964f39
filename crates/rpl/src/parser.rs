// RPL parser
// Parses pattern expressions and RPL source (package, import, bindings)
// into the structures of `ast`.

use crate::ast::{Binding, Exp, ImportDecl, Name, Predicate, Statement};
use crate::charset::{CharSet, NamedClass};
use crate::violation::{Violation, Who};

const KEYWORDS: &[&str] = &["package", "import", "local", "alias", "as"];

/// Deepest nesting of groups, predicates and repetitions in one expression.
pub const MAX_NESTING: usize = 100;

/// Parse a single pattern expression, as given to `compile`.
pub fn parse_expression(src: &str) -> Result<Exp, Violation> {
    let mut p = Parser::new(src, false);
    p.skip_space();
    if p.at_end() {
        return Err(p.violation("empty pattern expression"));
    }
    let exp = p.parse_choice()?;
    p.skip_space();
    if !p.at_end() {
        return Err(p.violation(format!("unexpected '{}'", p.peek_char())));
    }
    Ok(exp)
}

/// Parse a block of RPL statements, as given to `load`.
pub fn parse_source(src: &str) -> Result<Vec<Statement>, Violation> {
    let mut p = Parser::new(src, true);
    let mut statements = Vec::new();
    loop {
        p.skip_space();
        if p.at_end() {
            return Ok(statements);
        }
        let statement = p.parse_statement()?;
        if let Statement::Package { pos, .. } = statement {
            if !statements.is_empty() {
                return Err(Violation::error(
                    Who::Parser,
                    "package declaration must be the first statement",
                )
                .at(pos));
            }
        }
        statements.push(statement);
    }
}

struct Parser<'a> {
    text: &'a str,
    src: &'a [u8],
    pos: usize,
    /// Current nesting of groups, predicates and repetitions
    depth: usize,
    /// Sequences end before a new statement begins
    statements: bool,
}

impl<'a> Parser<'a> {
    fn new(text: &'a str, statements: bool) -> Self {
        Parser {
            text,
            src: text.as_bytes(),
            pos: 0,
            depth: 0,
            statements,
        }
    }

    fn at_end(&self) -> bool {
        self.pos >= self.src.len()
    }

    fn peek(&self) -> Option<u8> {
        self.src.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<u8> {
        self.src.get(self.pos + offset).copied()
    }

    fn peek_char(&self) -> char {
        self.text[self.pos..].chars().next().unwrap_or('\0')
    }

    fn violation(&self, message: impl Into<String>) -> Violation {
        let end = (self.pos + 16).min(self.src.len());
        let fragment = String::from_utf8_lossy(&self.src[self.pos.min(end)..end]).into_owned();
        Violation::error(Who::Parser, message)
            .at(self.pos + 1)
            .with_ast(fragment)
    }

    fn descend(&mut self) -> Result<(), Violation> {
        if self.depth >= MAX_NESTING {
            return Err(self.violation(format!(
                "expression nests more than {} levels deep",
                MAX_NESTING
            )));
        }
        self.depth += 1;
        Ok(())
    }

    fn skip_space(&mut self) {
        while let Some(b) = self.peek() {
            if b.is_ascii_whitespace() {
                self.pos += 1;
            } else if b == b'-' && self.peek_at(1) == Some(b'-') {
                while let Some(b) = self.peek() {
                    if b == b'\n' {
                        break;
                    }
                    self.pos += 1;
                }
            } else {
                break;
            }
        }
    }

    fn expect(&mut self, byte: u8, what: &str) -> Result<(), Violation> {
        self.skip_space();
        if self.peek() == Some(byte) {
            self.pos += 1;
            Ok(())
        } else {
            Err(self.violation(format!("expected {}", what)))
        }
    }

    // ==================== Statements ====================

    fn parse_statement(&mut self) -> Result<Statement, Violation> {
        let start = self.pos;
        let word = self
            .scan_identifier()
            .ok_or_else(|| self.violation("expected a statement"))?;
        match word.as_str() {
            "package" => {
                self.skip_space();
                let name = self.expect_plain_identifier("package name")?;
                Ok(Statement::Package {
                    name,
                    pos: start + 1,
                })
            }
            "import" => {
                let mut decls = Vec::new();
                loop {
                    self.skip_space();
                    let name = self.expect_plain_identifier("package name")?;
                    self.skip_space();
                    let alias = if self.lookahead_keyword("as") {
                        self.pos += 2;
                        self.skip_space();
                        Some(self.expect_plain_identifier("import alias")?)
                    } else {
                        None
                    };
                    decls.push(ImportDecl { name, alias });
                    self.skip_space();
                    if self.peek() == Some(b',') {
                        self.pos += 1;
                    } else {
                        break;
                    }
                }
                Ok(Statement::Import {
                    decls,
                    pos: start + 1,
                })
            }
            _ => {
                let mut local = false;
                let mut alias = false;
                let mut word = word;
                loop {
                    match word.as_str() {
                        "local" if !local && !alias => local = true,
                        "alias" if !alias => alias = true,
                        _ => break,
                    }
                    self.skip_space();
                    word = self
                        .scan_identifier()
                        .ok_or_else(|| self.violation("expected a binding name"))?;
                }
                if word.contains('.') {
                    self.pos = start;
                    return Err(self.violation(format!("cannot bind qualified name '{}'", word)));
                }
                if KEYWORDS.contains(&word.as_str()) {
                    self.pos = start;
                    return Err(self.violation(format!("'{}' is a reserved word", word)));
                }
                self.skip_space();
                if self.peek() != Some(b'=') {
                    return Err(self.violation(format!("expected '=' after '{}'", word)));
                }
                self.pos += 1;
                self.skip_space();
                if self.at_end() {
                    return Err(self.violation(format!("missing expression for '{}'", word)));
                }
                let exp = self.parse_choice()?;
                Ok(Statement::Bind(Binding {
                    name: word,
                    exp,
                    alias,
                    local,
                    pos: start + 1,
                }))
            }
        }
    }

    fn lookahead_keyword(&self, keyword: &str) -> bool {
        let bytes = keyword.as_bytes();
        self.src[self.pos..].starts_with(bytes)
            && !self
                .src
                .get(self.pos + bytes.len())
                .is_some_and(|b| is_ident_byte(*b))
    }

    fn expect_plain_identifier(&mut self, what: &str) -> Result<String, Violation> {
        match self.scan_identifier() {
            Some(id) if !id.contains('.') => Ok(id),
            _ => Err(self.violation(format!("expected {}", what))),
        }
    }

    /// Scan `name` or `pkg.name` at the cursor.
    fn scan_identifier(&mut self) -> Option<String> {
        let start = self.pos;
        if !self.peek().is_some_and(is_ident_start) {
            return None;
        }
        self.pos += 1;
        while self.peek().is_some_and(is_ident_byte) {
            self.pos += 1;
        }
        if self.peek() == Some(b'.') && self.peek_at(1).is_some_and(is_ident_start) {
            self.pos += 2;
            while self.peek().is_some_and(is_ident_byte) {
                self.pos += 1;
            }
        }
        Some(self.text[start..self.pos].to_string())
    }

    /// True when the cursor sits on something that begins a new statement.
    fn at_statement_start(&self) -> bool {
        if !self.statements {
            return false;
        }
        if ["package", "import", "local", "alias"]
            .iter()
            .any(|kw| self.lookahead_keyword(kw))
        {
            return true;
        }
        // identifier followed by '=' (but not '==')
        let mut i = self.pos;
        if !self.src.get(i).copied().is_some_and(is_ident_start) {
            return false;
        }
        while self.src.get(i).copied().is_some_and(|b| is_ident_byte(b) || b == b'.') {
            i += 1;
        }
        while self.src.get(i).is_some_and(|b| b.is_ascii_whitespace()) {
            i += 1;
        }
        self.src.get(i) == Some(&b'=') && self.src.get(i + 1) != Some(&b'=')
    }

    // ==================== Expressions ====================

    fn parse_choice(&mut self) -> Result<Exp, Violation> {
        let mut alternatives = vec![self.parse_sequence()?];
        loop {
            self.skip_space();
            if self.peek() == Some(b'/') {
                self.pos += 1;
                self.skip_space();
                alternatives.push(self.parse_sequence()?);
            } else {
                break;
            }
        }
        Ok(if alternatives.len() == 1 {
            alternatives.pop().unwrap_or(Exp::Seq(Vec::new()))
        } else {
            Exp::Choice(alternatives)
        })
    }

    fn parse_sequence(&mut self) -> Result<Exp, Violation> {
        let mut items = Vec::new();
        loop {
            self.skip_space();
            match self.peek() {
                None | Some(b'/') | Some(b')') | Some(b'}') => break,
                _ if self.at_statement_start() => break,
                _ => items.push(self.parse_prefixed()?),
            }
        }
        match items.len() {
            0 => Err(self.violation("expected an expression")),
            1 => Ok(items.pop().unwrap_or(Exp::Seq(Vec::new()))),
            _ => Ok(Exp::Seq(items)),
        }
    }

    fn parse_prefixed(&mut self) -> Result<Exp, Violation> {
        let kind = match self.peek() {
            Some(b'>') => Predicate::LookAhead,
            Some(b'!') => Predicate::NotAhead,
            _ => return self.parse_postfix(),
        };
        self.pos += 1;
        self.skip_space();
        self.descend()?;
        let exp = self.parse_prefixed()?;
        self.depth -= 1;
        Ok(Exp::Predicate {
            exp: Box::new(exp),
            kind,
        })
    }

    fn parse_postfix(&mut self) -> Result<Exp, Violation> {
        let mut exp = self.parse_atom()?;
        let mut repeats = 0;
        loop {
            let (min, max) = match self.peek() {
                Some(b'{') => match self.scan_bounds()? {
                    Some(bounds) => bounds,
                    None => break,
                },
                Some(b) => {
                    let bounds = match b {
                        b'*' => (0, None),
                        b'+' => (1, None),
                        b'?' => (0, Some(1)),
                        _ => break,
                    };
                    self.pos += 1;
                    bounds
                }
                None => break,
            };
            self.descend()?;
            repeats += 1;
            exp = Exp::Repeat {
                exp: Box::new(exp),
                min,
                max,
            };
        }
        self.depth -= repeats;
        Ok(exp)
    }

    /// `{n}`, `{n,}`, `{,m}` or `{n,m}` directly after an atom. Returns
    /// `None` (cursor unchanged) when the brace opens a group instead.
    fn scan_bounds(&mut self) -> Result<Option<(u32, Option<u32>)>, Violation> {
        let start = self.pos;
        let mut i = start + 1;
        while self.src.get(i).is_some_and(|b| b.is_ascii_digit() || *b == b',' || *b == b' ') {
            i += 1;
        }
        if self.src.get(i) != Some(&b'}') {
            return Ok(None);
        }
        let body: String = self.text[start + 1..i].chars().filter(|c| *c != ' ').collect();
        if body.is_empty() || body.matches(',').count() > 1 {
            return Err(self.violation("invalid repetition bounds"));
        }
        let number = |s: &str| -> Result<Option<u32>, Violation> {
            if s.is_empty() {
                return Ok(None);
            }
            s.parse::<u32>()
                .map(Some)
                .map_err(|_| self.violation("repetition bound too large"))
        };
        let (min, max) = match body.split_once(',') {
            Some((lo, hi)) => (number(lo)?.unwrap_or(0), number(hi)?),
            None => {
                let n = number(&body)?;
                (n.unwrap_or(0), n)
            }
        };
        if max.is_some_and(|m| m < min) {
            return Err(self.violation(format!("repetition bounds {{{}}} are reversed", body)));
        }
        self.pos = i + 1;
        Ok(Some((min, max)))
    }

    fn parse_atom(&mut self) -> Result<Exp, Violation> {
        let start = self.pos;
        match self.peek() {
            Some(b'"') => self.parse_literal(),
            Some(b'[') => {
                self.pos += 1;
                Ok(Exp::Set(self.parse_set(start)?))
            }
            Some(b'.') => {
                self.pos += 1;
                Ok(Exp::Any)
            }
            Some(b'^') => {
                self.pos += 1;
                Ok(Exp::Start)
            }
            Some(b'$') => {
                self.pos += 1;
                Ok(Exp::End)
            }
            Some(open @ (b'(' | b'{')) => {
                self.pos += 1;
                self.skip_space();
                let close = if open == b'(' { b')' } else { b'}' };
                self.descend()?;
                let exp = self.parse_choice()?;
                self.depth -= 1;
                self.expect(close, if close == b')' { "')'" } else { "'}'" })?;
                Ok(exp)
            }
            Some(b) if is_ident_start(b) => {
                let id = self.scan_identifier().unwrap_or_default();
                if KEYWORDS.contains(&id.as_str()) {
                    self.pos = start;
                    return Err(self.violation(format!("'{}' is a reserved word", id)));
                }
                Ok(Exp::Ref {
                    name: Name::parse(&id),
                    pos: start + 1,
                })
            }
            Some(_) => Err(self.violation(format!("unexpected '{}'", self.peek_char()))),
            None => Err(self.violation("unexpected end of expression")),
        }
    }

    fn parse_literal(&mut self) -> Result<Exp, Violation> {
        let start = self.pos;
        self.pos += 1; // opening quote
        let mut bytes = Vec::new();
        loop {
            match self.peek() {
                None => {
                    self.pos = start;
                    return Err(self.violation("unterminated string literal"));
                }
                Some(b'"') => {
                    self.pos += 1;
                    return Ok(Exp::Literal(bytes));
                }
                Some(b'\\') => {
                    self.pos += 1;
                    bytes.push(self.parse_escape()?);
                }
                Some(b) => {
                    bytes.push(b);
                    self.pos += 1;
                }
            }
        }
    }

    /// Cursor is just past a backslash.
    fn parse_escape(&mut self) -> Result<u8, Violation> {
        let b = self
            .peek()
            .ok_or_else(|| self.violation("unterminated escape"))?;
        self.pos += 1;
        Ok(match b {
            b'n' => b'\n',
            b'r' => b'\r',
            b't' => b'\t',
            b'x' => {
                let hex = self.text.get(self.pos..self.pos + 2).unwrap_or("");
                let value = u8::from_str_radix(hex, 16)
                    .map_err(|_| self.violation("invalid \\x escape"))?;
                self.pos += 2;
                value
            }
            b'"' | b'\\' | b'[' | b']' | b'-' | b'^' => b,
            _ => {
                self.pos -= 2;
                return Err(self.violation(format!("invalid escape '\\{}'", b as char)));
            }
        })
    }

    /// Cursor is just past `[`; `start` is the position of that bracket.
    fn parse_set(&mut self, start: usize) -> Result<CharSet, Violation> {
        let missing = |p: &mut Parser<'_>| {
            p.pos = start;
            p.violation("missing ']' in character set")
        };

        // [:name:]
        if self.peek() == Some(b':') {
            let body_start = self.pos + 1;
            let mut i = body_start;
            while self.src.get(i).is_some_and(|b| b.is_ascii_alphabetic() || *b == b'^') {
                i += 1;
            }
            if self.src.get(i) != Some(&b':') || self.src.get(i + 1) != Some(&b']') {
                return Err(missing(self));
            }
            let body = &self.text[body_start..i];
            let (complement, name) = match body.strip_prefix('^') {
                Some(rest) => (true, rest),
                None => (false, body),
            };
            let class = NamedClass::from_name(name)
                .ok_or_else(|| self.violation(format!("unknown character class '{}'", name)))?;
            self.pos = i + 2;
            let set = CharSet::from_class(class);
            return Ok(if complement { set.complement() } else { set });
        }

        let complement = if self.peek() == Some(b'^') {
            self.pos += 1;
            true
        } else {
            false
        };

        let mut set = CharSet::empty();
        loop {
            match self.peek() {
                None => return Err(missing(self)),
                Some(b']') => {
                    self.pos += 1;
                    break;
                }
                Some(b'[') => {
                    let nested = self.pos;
                    self.pos += 1;
                    self.descend()?;
                    set = set.union(&self.parse_set(nested)?);
                    self.depth -= 1;
                }
                Some(_) => {
                    let lo = self.set_byte()?;
                    if self.peek() == Some(b'-') && self.peek_at(1).is_some_and(|b| b != b']') {
                        self.pos += 1;
                        let hi = self.set_byte()?;
                        if hi < lo {
                            return Err(self.violation("character range is reversed"));
                        }
                        set = set.union(&CharSet::from_range(lo, hi));
                    } else {
                        set.insert(lo);
                    }
                }
            }
        }
        Ok(if complement { set.complement() } else { set })
    }

    fn set_byte(&mut self) -> Result<u8, Violation> {
        match self.peek() {
            Some(b'\\') => {
                self.pos += 1;
                self.parse_escape()
            }
            Some(b) => {
                self.pos += 1;
                Ok(b)
            }
            None => Err(self.violation("missing ']' in character set")),
        }
    }
}

fn is_ident_start(b: u8) -> bool {
    b.is_ascii_alphabetic() || b == b'_'
}

fn is_ident_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_'
}
