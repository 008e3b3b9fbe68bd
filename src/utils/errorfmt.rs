use std::{
    error::Error,
    fmt::{Debug, Display, Formatter},
};

/// Formats an error followed by every error in its source chain.
pub struct ErrorFmt<E>(pub E);

impl<E: Error> ErrorFmt<E> {
    fn chain(&self) -> impl Iterator<Item = &dyn Error> {
        std::iter::successors(Some(&self.0 as &dyn Error), |e| (*e).source())
    }
}

impl<E: Error> Display for ErrorFmt<E> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        for (idx, e) in self.chain().enumerate() {
            if idx > 0 {
                f.write_str(": ")?;
            }
            Display::fmt(e, f)?;
        }
        Ok(())
    }
}

impl<E: Error> Debug for ErrorFmt<E> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        Display::fmt(self, f)
    }
}
