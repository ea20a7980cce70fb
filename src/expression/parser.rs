use super::functions::{self, FunctionInfo};
use super::lexer::Token;
use super::statistics::TimeWindow;
use super::ExpressionError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Gt,
    Lt,
    Gte,
    Lte,
    Eq,
    Ne,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Number(f64),
    Str(String),
    Variable(String),
    Neg(Box<Expr>),
    Binary(BinaryOp, Box<Expr>, Box<Expr>),
    Call(&'static FunctionInfo, Vec<Expr>),
    /// Statistics call with its series arguments already resolved
    Statistic(&'static FunctionInfo, String, TimeWindow),
}

/// Deepest nesting of parentheses, call arguments and unary minus
pub const MAX_DEPTH: usize = 64;

pub struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    depth: usize,
}

impl Parser {
    pub fn new(tokens: Vec<Token>) -> Self {
        Self { tokens, pos: 0, depth: 0 }
    }

    pub fn parse(mut self) -> Result<Expr, ExpressionError> {
        if self.tokens.is_empty() {
            return Err(ExpressionError::Empty);
        }
        let expr = self.comparison()?;
        match self.peek() {
            None => Ok(expr),
            Some(token) => Err(ExpressionError::UnexpectedToken(token.to_string())),
        }
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn advance(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn expect(&mut self, expected: Token) -> Result<(), ExpressionError> {
        match self.advance() {
            Some(token) if token == expected => Ok(()),
            Some(token) => Err(ExpressionError::UnexpectedToken(token.to_string())),
            None => Err(ExpressionError::UnexpectedEnd),
        }
    }

    /// Runs `f` one nesting level down
    fn nested<T>(&mut self, f: impl FnOnce(&mut Self) -> Result<T, ExpressionError>) -> Result<T, ExpressionError> {
        if self.depth >= MAX_DEPTH {
            return Err(ExpressionError::TooDeep(MAX_DEPTH));
        }
        self.depth += 1;
        let result = f(self);
        self.depth -= 1;
        result
    }

    fn comparison(&mut self) -> Result<Expr, ExpressionError> {
        self.nested(Self::comparison_level)
    }

    fn comparison_level(&mut self) -> Result<Expr, ExpressionError> {
        let mut left = self.additive()?;
        loop {
            let op = match self.peek() {
                Some(Token::Gt) => BinaryOp::Gt,
                Some(Token::Lt) => BinaryOp::Lt,
                Some(Token::Gte) => BinaryOp::Gte,
                Some(Token::Lte) => BinaryOp::Lte,
                Some(Token::EqEq) => BinaryOp::Eq,
                Some(Token::NotEq) => BinaryOp::Ne,
                _ => return Ok(left),
            };
            self.pos += 1;
            let right = self.additive()?;
            left = Expr::Binary(op, Box::new(left), Box::new(right));
        }
    }

    fn additive(&mut self) -> Result<Expr, ExpressionError> {
        let mut left = self.term()?;
        loop {
            let op = match self.peek() {
                Some(Token::Plus) => BinaryOp::Add,
                Some(Token::Minus) => BinaryOp::Sub,
                _ => return Ok(left),
            };
            self.pos += 1;
            let right = self.term()?;
            left = Expr::Binary(op, Box::new(left), Box::new(right));
        }
    }

    fn term(&mut self) -> Result<Expr, ExpressionError> {
        let mut left = self.unary()?;
        loop {
            let op = match self.peek() {
                Some(Token::Star) => BinaryOp::Mul,
                Some(Token::Slash) => BinaryOp::Div,
                _ => return Ok(left),
            };
            self.pos += 1;
            let right = self.unary()?;
            left = Expr::Binary(op, Box::new(left), Box::new(right));
        }
    }

    fn unary(&mut self) -> Result<Expr, ExpressionError> {
        if self.peek() == Some(&Token::Minus) {
            self.pos += 1;
            let operand = self.nested(Self::unary)?;
            return Ok(Expr::Neg(Box::new(operand)));
        }
        self.primary()
    }

    fn primary(&mut self) -> Result<Expr, ExpressionError> {
        match self.advance() {
            Some(Token::Number(n)) => Ok(Expr::Number(n)),
            Some(Token::Str(s)) => Ok(Expr::Str(s)),
            Some(Token::Ident(name)) => {
                if self.peek() == Some(&Token::LParen) {
                    self.pos += 1;
                    let args = self.arguments()?;
                    call(&name, args)
                } else {
                    Ok(Expr::Variable(name))
                }
            }
            Some(Token::LParen) => {
                let inner = self.comparison()?;
                self.expect(Token::RParen)?;
                Ok(inner)
            }
            Some(token) => Err(ExpressionError::UnexpectedToken(token.to_string())),
            None => Err(ExpressionError::UnexpectedEnd),
        }
    }

    /// Arguments after an opening parenthesis, through the closing one
    fn arguments(&mut self) -> Result<Vec<Expr>, ExpressionError> {
        let mut args = Vec::new();
        if self.peek() == Some(&Token::RParen) {
            self.pos += 1;
            return Ok(args);
        }
        loop {
            args.push(self.comparison()?);
            match self.advance() {
                Some(Token::Comma) => continue,
                Some(Token::RParen) => return Ok(args),
                Some(token) => return Err(ExpressionError::UnexpectedToken(token.to_string())),
                None => return Err(ExpressionError::UnexpectedEnd),
            }
        }
    }
}

fn call(name: &str, args: Vec<Expr>) -> Result<Expr, ExpressionError> {
    let spec = functions::lookup(name).ok_or_else(|| ExpressionError::UnknownFunction(name.to_string()))?;
    spec.check_arity(args.len())?;

    if !spec.is_statistic() {
        return Ok(Expr::Call(spec, args));
    }

    let variable = match &args[0] {
        Expr::Str(s) | Expr::Variable(s) => s.trim().to_string(),
        _ => {
            return Err(ExpressionError::InvalidArgument(format!(
                "{}: first argument must be a variable name",
                spec.name
            )))
        }
    };
    let window = match &args[1] {
        Expr::Str(code) => code.parse::<TimeWindow>()?,
        _ => {
            return Err(ExpressionError::InvalidArgument(format!(
                "{}: second argument must be a time window such as \"5m\"",
                spec.name
            )))
        }
    };
    Ok(Expr::Statistic(spec, variable, window))
}

#[cfg(test)]
mod tests {
    use super::super::lexer::tokenize;
    use super::*;

    fn parse(src: &str) -> Result<Expr, ExpressionError> {
        Parser::new(tokenize(src)?).parse()
    }

    #[test]
    fn multiplication_binds_tighter_than_addition() {
        let expr = parse("1 + 2 * 3").unwrap();
        match expr {
            Expr::Binary(BinaryOp::Add, left, right) => {
                assert_eq!(*left, Expr::Number(1.0));
                assert!(matches!(*right, Expr::Binary(BinaryOp::Mul, _, _)));
            }
            other => panic!("unexpected tree: {:?}", other),
        }
    }

    #[test]
    fn comparison_has_lowest_precedence() {
        let expr = parse("a + 1 > b * 2").unwrap();
        assert!(matches!(expr, Expr::Binary(BinaryOp::Gt, _, _)));
    }

    #[test]
    fn statistics_arguments_are_resolved_at_parse_time() {
        let expr = parse("avg(\"voltage\", \"5m\")").unwrap();
        match expr {
            Expr::Statistic(spec, variable, window) => {
                assert_eq!(spec.name, "avg");
                assert_eq!(variable, "voltage");
                assert_eq!(window.to_string(), "5m");
            }
            other => panic!("unexpected tree: {:?}", other),
        }
        assert!(parse("avg(voltage, '1h')").is_ok());
        assert!(parse("avg(voltage, 5)").is_err());
        assert!(parse("avg(voltage, '5w')").is_err());
    }

    #[test]
    fn reports_structural_errors() {
        assert_eq!(parse(""), Err(ExpressionError::Empty));
        assert_eq!(parse("(1 + 2"), Err(ExpressionError::UnexpectedEnd));
        assert!(matches!(parse("1 + 2)"), Err(ExpressionError::UnexpectedToken(_))));
        assert_eq!(parse("foo(1)"), Err(ExpressionError::UnknownFunction("foo".into())));
        assert!(matches!(parse("sqrt(1, 2)"), Err(ExpressionError::ArgumentCount { .. })));
    }

    #[test]
    fn nesting_is_bounded() {
        let ok = format!("{}1{}", "(".repeat(MAX_DEPTH - 1), ")".repeat(MAX_DEPTH - 1));
        assert_eq!(parse(&ok), Ok(Expr::Number(1.0)));

        let deep = format!("{}1{}", "(".repeat(MAX_DEPTH), ")".repeat(MAX_DEPTH));
        assert_eq!(parse(&deep), Err(ExpressionError::TooDeep(MAX_DEPTH)));

        let negations = format!("{}1", "-".repeat(MAX_DEPTH * 2));
        assert_eq!(parse(&negations), Err(ExpressionError::TooDeep(MAX_DEPTH)));

        let calls = format!("{}1{}", "abs(".repeat(MAX_DEPTH), ")".repeat(MAX_DEPTH));
        assert_eq!(parse(&calls), Err(ExpressionError::TooDeep(MAX_DEPTH)));
    }

    #[test]
    fn huge_nesting_fails_on_a_small_stack() {
        let handle = std::thread::Builder::new()
            .stack_size(1024 * 1024)
            .spawn(|| {
                let src = format!("{}1{}", "(".repeat(200_000), ")".repeat(200_000));
                parse(&src)
            })
            .unwrap();
        assert_eq!(handle.join().unwrap(), Err(ExpressionError::TooDeep(MAX_DEPTH)));
    }
}
