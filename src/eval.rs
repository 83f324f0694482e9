//! Restricted constant-expression folder.
//!
//! Allocation checks need to know whether a size expression such as
//! `1 << 30` or `16 * 1024 * 1024` denotes a constant, and how large it is.
//! This module evaluates such fragments without executing anything:
//!
//! - integer literals (decimal, `0x`, `0o`, `0b`, leading-zero octal),
//!   `_` digit separators and trailing `u`/`U`/`l`/`L`/`n` suffixes
//! - binary `+ - * / // % << >> **` and unary `+ -`, with parentheses
//!
//! Precedence and rounding follow Python: `**` binds tighter than unary
//! minus, `/` and `//` floor, `%` takes the sign of the divisor. Anything
//! else (identifiers, calls, floats, strings, other operators) makes the
//! expression non-foldable. The folder never panics.

/// Maximum nesting depth of parentheses and unary operators.
const MAX_DEPTH: usize = 64;

/// Maximum number of tokens in a foldable expression.
const MAX_TOKENS: usize = 512;

/// Largest exponent accepted by `**`.
const MAX_EXPONENT: i128 = 64;

/// Outcome of folding a size expression.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FoldedSize {
    /// The expression is a constant with this value.
    Known(i128),
    /// The expression is a constant whose value does not fit in an `i128`.
    Unbounded,
    /// The expression is not a foldable constant.
    Unknown,
}

impl FoldedSize {
    /// Fold an expression.
    pub fn of(expr: &str) -> Self {
        match evaluate(expr) {
            Ok(v) => FoldedSize::Known(v),
            Err(FoldError::Overflow) => FoldedSize::Unbounded,
            Err(FoldError::NotConstant) => FoldedSize::Unknown,
        }
    }

    /// Whether this size reaches `threshold`.
    ///
    /// Overflowed constants always do; unknown sizes never do.
    pub fn exceeds(self, threshold: i128) -> bool {
        match self {
            FoldedSize::Known(v) => v >= threshold,
            FoldedSize::Unbounded => true,
            FoldedSize::Unknown => false,
        }
    }

    /// Whether the size is a constant strictly below `threshold`.
    pub fn is_below(self, threshold: i128) -> bool {
        matches!(self, FoldedSize::Known(v) if v < threshold)
    }

    /// Product of two sizes, as used for array dimensions and element counts.
    pub fn times(self, other: FoldedSize) -> FoldedSize {
        match (self, other) {
            (FoldedSize::Unknown, _) | (_, FoldedSize::Unknown) => FoldedSize::Unknown,
            (FoldedSize::Known(0), _) | (_, FoldedSize::Known(0)) => FoldedSize::Known(0),
            (FoldedSize::Known(a), FoldedSize::Known(b)) => a
                .checked_mul(b)
                .map(FoldedSize::Known)
                .unwrap_or(FoldedSize::Unbounded),
            _ => FoldedSize::Unbounded,
        }
    }

    /// Difference of two sizes, as used for `range(start, stop)` lengths.
    pub fn minus(self, other: FoldedSize) -> FoldedSize {
        match (self, other) {
            (FoldedSize::Unknown, _) | (_, FoldedSize::Unknown) => FoldedSize::Unknown,
            (FoldedSize::Known(a), FoldedSize::Known(b)) => a
                .checked_sub(b)
                .map(FoldedSize::Known)
                .unwrap_or(FoldedSize::Unbounded),
            _ => FoldedSize::Unbounded,
        }
    }
}

/// Fold `expr` into a [`FoldedSize`].
pub fn fold_size(expr: &str) -> FoldedSize {
    FoldedSize::of(expr)
}

/// Fold `expr` to an integer, or `None` if it is not a foldable constant
/// (including constants that overflow `i128`).
pub fn fold(expr: &str) -> Option<i128> {
    evaluate(expr).ok()
}

/// Fold `expr` and report whether it is a constant of at least `threshold`.
pub fn exceeds(expr: &str, threshold: i128) -> bool {
    FoldedSize::of(expr).exceeds(threshold)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FoldError {
    NotConstant,
    Overflow,
}

type FoldResult<T> = Result<T, FoldError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Op {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Shl,
    Shr,
    Pow,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Token {
    /// Integer literal; `None` when the literal itself overflows.
    Int(Option<i128>),
    Op(Op),
    LParen,
    RParen,
}

#[derive(Debug)]
enum Expr {
    Lit(Option<i128>),
    Neg(Box<Expr>),
    Binary(Op, Box<Expr>, Box<Expr>),
}

fn evaluate(expr: &str) -> FoldResult<i128> {
    let tokens = tokenize(expr)?;
    if tokens.len() > MAX_TOKENS {
        return Err(FoldError::NotConstant);
    }
    let mut parser = ExprParser {
        tokens: &tokens,
        pos: 0,
        depth: 0,
    };
    let tree = parser.shift()?;
    if parser.pos != tokens.len() {
        return Err(FoldError::NotConstant);
    }
    eval_node(&tree)
}

fn tokenize(expr: &str) -> FoldResult<Vec<Token>> {
    let bytes = expr.as_bytes();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < bytes.len() {
        let c = bytes[i];
        match c {
            b' ' | b'\t' | b'\n' | b'\r' => i += 1,
            b'(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            b')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            b'+' => {
                tokens.push(Token::Op(Op::Add));
                i += 1;
            }
            b'-' => {
                tokens.push(Token::Op(Op::Sub));
                i += 1;
            }
            b'%' => {
                tokens.push(Token::Op(Op::Mod));
                i += 1;
            }
            b'*' => {
                if bytes.get(i + 1) == Some(&b'*') {
                    tokens.push(Token::Op(Op::Pow));
                    i += 2;
                } else {
                    tokens.push(Token::Op(Op::Mul));
                    i += 1;
                }
            }
            b'/' => {
                // `/` and `//` both floor
                tokens.push(Token::Op(Op::Div));
                i += if bytes.get(i + 1) == Some(&b'/') { 2 } else { 1 };
            }
            b'<' if bytes.get(i + 1) == Some(&b'<') => {
                tokens.push(Token::Op(Op::Shl));
                i += 2;
            }
            b'>' if bytes.get(i + 1) == Some(&b'>') => {
                tokens.push(Token::Op(Op::Shr));
                i += 2;
            }
            b'0'..=b'9' => {
                let (value, next) = lex_int(bytes, i)?;
                tokens.push(Token::Int(value));
                i = next;
            }
            _ => return Err(FoldError::NotConstant),
        }
    }

    Ok(tokens)
}

/// Lex an integer literal starting at `start`. Returns the value (`None` on
/// overflow) and the index just past the literal and its suffix.
fn lex_int(bytes: &[u8], start: usize) -> FoldResult<(Option<i128>, usize)> {
    let mut i = start;
    let radix = match (bytes[i], bytes.get(i + 1)) {
        (b'0', Some(b'x' | b'X')) => 16,
        (b'0', Some(b'o' | b'O')) => 8,
        (b'0', Some(b'b' | b'B')) => 2,
        _ => 10,
    };
    if radix != 10 {
        i += 2;
    }

    let digits_start = i;
    while i < bytes.len() && (bytes[i] == b'_' || (bytes[i] as char).is_digit(radix)) {
        i += 1;
    }
    let digits: String = std::str::from_utf8(&bytes[digits_start..i])
        .map_err(|_| FoldError::NotConstant)?
        .chars()
        .filter(|c| *c != '_')
        .collect();
    if digits.is_empty() {
        return Err(FoldError::NotConstant);
    }

    // Floats and complex literals are not integer sizes.
    if radix == 10 && matches!(bytes.get(i), Some(b'.' | b'e' | b'E' | b'j' | b'J')) {
        return Err(FoldError::NotConstant);
    }

    while i < bytes.len() && matches!(bytes[i], b'u' | b'U' | b'l' | b'L' | b'n') {
        i += 1;
    }
    if i < bytes.len() && (bytes[i].is_ascii_alphanumeric() || bytes[i] == b'_' || bytes[i] == b'.') {
        return Err(FoldError::NotConstant);
    }

    // Legacy octal: 0777 as in C, Go and Java.
    let (digits, radix) = if radix == 10 && digits.len() > 1 && digits.starts_with('0') {
        if digits.bytes().all(|b| b == b'0') {
            ("0".to_string(), 10)
        } else if digits.bytes().all(|b| (b'0'..=b'7').contains(&b)) {
            (digits, 8)
        } else {
            return Err(FoldError::NotConstant);
        }
    } else {
        (digits, radix)
    };

    let value = i128::from_str_radix(&digits, radix).ok();
    Ok((value, i))
}

struct ExprParser<'t> {
    tokens: &'t [Token],
    pos: usize,
    depth: usize,
}

impl ExprParser<'_> {
    fn peek(&self) -> Option<Token> {
        self.tokens.get(self.pos).copied()
    }

    fn peek_op(&self, ops: &[Op]) -> Option<Op> {
        match self.peek() {
            Some(Token::Op(op)) if ops.contains(&op) => Some(op),
            _ => None,
        }
    }

    fn descend(&mut self) -> FoldResult<()> {
        self.depth += 1;
        if self.depth > MAX_DEPTH {
            return Err(FoldError::NotConstant);
        }
        Ok(())
    }

    fn shift(&mut self) -> FoldResult<Expr> {
        let mut lhs = self.arith()?;
        while let Some(op) = self.peek_op(&[Op::Shl, Op::Shr]) {
            self.pos += 1;
            let rhs = self.arith()?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn arith(&mut self) -> FoldResult<Expr> {
        let mut lhs = self.term()?;
        while let Some(op) = self.peek_op(&[Op::Add, Op::Sub]) {
            self.pos += 1;
            let rhs = self.term()?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn term(&mut self) -> FoldResult<Expr> {
        let mut lhs = self.factor()?;
        while let Some(op) = self.peek_op(&[Op::Mul, Op::Div, Op::Mod]) {
            self.pos += 1;
            let rhs = self.factor()?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn factor(&mut self) -> FoldResult<Expr> {
        match self.peek_op(&[Op::Add, Op::Sub]) {
            Some(op) => {
                self.pos += 1;
                self.descend()?;
                let operand = self.factor()?;
                self.depth -= 1;
                Ok(if op == Op::Sub {
                    Expr::Neg(Box::new(operand))
                } else {
                    operand
                })
            }
            None => self.power(),
        }
    }

    fn power(&mut self) -> FoldResult<Expr> {
        let base = self.primary()?;
        if self.peek_op(&[Op::Pow]).is_some() {
            self.pos += 1;
            // Right-associative, and the exponent may carry a unary sign.
            self.descend()?;
            let exponent = self.factor()?;
            self.depth -= 1;
            return Ok(Expr::Binary(Op::Pow, Box::new(base), Box::new(exponent)));
        }
        Ok(base)
    }

    fn primary(&mut self) -> FoldResult<Expr> {
        match self.peek() {
            Some(Token::Int(v)) => {
                self.pos += 1;
                Ok(Expr::Lit(v))
            }
            Some(Token::LParen) => {
                self.pos += 1;
                self.descend()?;
                let inner = self.shift()?;
                self.depth -= 1;
                if self.peek() != Some(Token::RParen) {
                    return Err(FoldError::NotConstant);
                }
                self.pos += 1;
                Ok(inner)
            }
            _ => Err(FoldError::NotConstant),
        }
    }
}

fn eval_node(expr: &Expr) -> FoldResult<i128> {
    match expr {
        Expr::Lit(v) => v.ok_or(FoldError::Overflow),
        Expr::Neg(inner) => eval_node(inner)?.checked_neg().ok_or(FoldError::Overflow),
        Expr::Binary(op, lhs, rhs) => {
            let a = eval_node(lhs)?;
            let b = eval_node(rhs)?;
            apply(*op, a, b)
        }
    }
}

fn apply(op: Op, a: i128, b: i128) -> FoldResult<i128> {
    let overflow = FoldError::Overflow;
    match op {
        Op::Add => a.checked_add(b).ok_or(overflow),
        Op::Sub => a.checked_sub(b).ok_or(overflow),
        Op::Mul => a.checked_mul(b).ok_or(overflow),
        Op::Div => {
            if b == 0 {
                return Err(FoldError::NotConstant);
            }
            let q = a.checked_div(b).ok_or(overflow)?;
            if a % b != 0 && ((a < 0) != (b < 0)) {
                Ok(q - 1)
            } else {
                Ok(q)
            }
        }
        Op::Mod => {
            if b == 0 {
                return Err(FoldError::NotConstant);
            }
            let r = a.checked_rem(b).unwrap_or(0);
            if r != 0 && ((r < 0) != (b < 0)) {
                Ok(r + b)
            } else {
                Ok(r)
            }
        }
        Op::Shl => {
            if b < 0 {
                return Err(FoldError::NotConstant);
            }
            if a == 0 {
                return Ok(0);
            }
            if b >= 127 {
                return Err(overflow);
            }
            let shifted = a << b;
            if shifted >> b != a {
                return Err(overflow);
            }
            Ok(shifted)
        }
        Op::Shr => {
            if b < 0 {
                return Err(FoldError::NotConstant);
            }
            if b >= 127 {
                return Ok(if a < 0 { -1 } else { 0 });
            }
            Ok(a >> b)
        }
        Op::Pow => {
            if !(0..=MAX_EXPONENT).contains(&b) {
                return Err(FoldError::NotConstant);
            }
            a.checked_pow(b as u32).ok_or(overflow)
        }
    }
}
