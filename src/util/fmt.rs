use std::fmt::Debug;

/// Writes the contained `&str` directly (without `"`s) to the Formatter.
pub struct DebugInline<'a>(pub &'a str);

impl<'a> Debug for DebugInline<'a> {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.write_str(self.0)
    }
}

/// Formats the inner value with `{:?}` even when the outer formatter uses `{:#?}`.
pub struct DebugNoAlternate<'a, T: Debug>(pub &'a T);

impl<'a, T: Debug> Debug for DebugNoAlternate<'a, T> {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        let d = format!("{:?}", self.0);
        f.write_str(&d)
    }
}

/// Adds `name` to `debug_struct` only when `value` is `Some(_)`.
pub fn opt_field<'a, 'b: 'a>(debug_struct: &mut std::fmt::DebugStruct<'a, 'b>,
                             name: &str, value: &Option<impl Debug>)
{
    let Some(ref value) = value else {
        return;
    };

    debug_struct.field(name, &DebugNoAlternate(value));
}

#[cfg(test)]
mod test {
    use super::*;

    struct Sample {
        title: Option<String>,
        season: Option<u32>,
    }

    impl Debug for Sample {
        fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
            let mut s = f.debug_struct("Sample");
            opt_field(&mut s, "title", &self.title);
            opt_field(&mut s, "season", &self.season);
            s.finish()
        }
    }

    #[test]
    fn opt_field_skips_none() {
        let sample = Sample { title: Some("Big Buck Bunny".into()), season: None };
        assert_eq!(format!("{sample:?}"), r#"Sample { title: "Big Buck Bunny" }"#);
    }

    #[test]
    fn no_alternate_stays_on_one_line() {
        let v = vec![1, 2];
        assert_eq!(format!("{:#?}", DebugNoAlternate(&v)), "[1, 2]");
        assert_eq!(format!("{:#?}", DebugInline("PLAYING")), "PLAYING");
    }
}
