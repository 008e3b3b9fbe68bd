macro_rules! tassert {
    ($cond:expr) => {
        if !$cond {
            bail!(
                "Assert `{}` failed ({}:{})",
                stringify!($cond),
                file!(),
                line!()
            );
        }
    };
}

macro_rules! tassert_eq {
    ($left:expr, $right:expr) => {{
        let left = $left;
        let right = $right;
        if left != right {
            bail!(
                "Assert `{} = {:?} = {:?} = {}` failed ({}:{})",
                stringify!($left),
                left,
                right,
                stringify!($right),
                file!(),
                line!()
            );
        }
    }};
}

/// Asserts that a connection request failed with an error of the given shape.
macro_rules! tassert_err {
    ($res:expr, $pat:pat $(if $guard:expr)?) => {{
        match $res {
            Err($pat) $(if $guard)? => {}
            res => bail!(
                "Expected `{}` to fail with `{}` but got {:?} ({}:{})",
                stringify!($res),
                stringify!($pat),
                res,
                file!(),
                line!()
            ),
        }
    }};
}
