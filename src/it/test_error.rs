use {
    crate::utils::errorfmt::ErrorFmt,
    std::{
        error::Error,
        fmt::{Debug, Display, Formatter},
    },
};

pub type TestResult<T = ()> = Result<T, TestError>;

/// A failed check or a server error, wrapped in the context it happened in.
pub struct TestError {
    /// Outermost context first.
    context: Vec<String>,
    cause: Cause,
}

enum Cause {
    Message(String),
    Error(Box<dyn Error>),
}

impl TestError {
    pub fn new<D: Display>(d: D) -> Self {
        Self {
            context: vec![],
            cause: Cause::Message(d.to_string()),
        }
    }

    fn context<D: Display>(mut self, d: D) -> Self {
        self.context.insert(0, d.to_string());
        self
    }
}

impl Display for TestError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        for context in &self.context {
            write!(f, "{}: ", context)?;
        }
        match &self.cause {
            Cause::Message(msg) => f.write_str(msg),
            Cause::Error(e) => write!(f, "{}", ErrorFmt(&**e)),
        }
    }
}

impl Debug for TestError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        Display::fmt(self, f)
    }
}

impl<E: Error + 'static> From<E> for TestError {
    fn from(error: E) -> Self {
        Self {
            context: vec![],
            cause: Cause::Error(Box::new(error)),
        }
    }
}

pub trait TestErrorExt<T> {
    fn with_context<D, F>(self, f: F) -> TestResult<T>
    where
        D: Display,
        F: FnOnce() -> D;
}

impl<T, E: Into<TestError>> TestErrorExt<T> for Result<T, E> {
    fn with_context<D, F>(self, f: F) -> TestResult<T>
    where
        D: Display,
        F: FnOnce() -> D,
    {
        self.map_err(|e| e.into().context(f()))
    }
}

macro_rules! bail {
    ($($tt:tt)*) => {{
        let msg = format!($($tt)*);
        return Err(crate::it::test_error::TestError::new(msg));
    }}
}
