use libm::fabsf;

/// Sign of `x` as -1, 0 or 1. Unlike `f32::signum`, zero maps to zero.
pub(crate) fn sgn(x: f32) -> f32 {
    if x == 0. {
        0.
    } else if x > 0. {
        1.
    } else {
        -1.
    }
}

/// Integer counterpart of [`sgn`].
pub(crate) fn sgn_cmd(x: i16) -> i16 {
    x.signum()
}

/// Clips `x` to a magnitude of `limit`, keeping its sign.
pub(crate) fn clip_magnitude(x: f32, limit: f32) -> f32 {
    if fabsf(x) > limit {
        sgn(x) * limit
    } else {
        x
    }
}
