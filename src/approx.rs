macro_rules! assert_approx {
    ($x:expr, $y:expr) => {
        $crate::approx::assert_approx!($x, $y, 1.0e-9)
    };
    ($x:expr, $y:expr, $delta:expr) => {{
        let (left, right): (f64, f64) = ($x, $y);
        let difference = (left - right).abs();
        if difference > $delta {
            panic!(
                "{} differs from {} by {} (allowed {})",
                left, right, difference, $delta
            );
        }
    }};
}

pub(crate) use assert_approx;
