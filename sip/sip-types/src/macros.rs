macro_rules! impl_from_str {
    ($ty:ty, $what:literal) => {
        impl std::str::FromStr for $ty {
            type Err = crate::parse::InvalidValue;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                use nom::Finish;

                let src = bytesstr::BytesStr::from(s);

                match <$ty as crate::parse::Parse>::parse(src.as_ref())(&src).finish() {
                    Ok(("", value)) => Ok(value),
                    _ => Err(crate::parse::InvalidValue::new($what, s)),
                }
            }
        }
    };
}
