macro_rules! test_roundtrip {
    ($t:ty, $name:ident) => {
        proptest::proptest! {
            #![proptest_config(proptest::prelude::ProptestConfig{fork: false, ..Default::default()})]
            #[test]
            fn $name(orig: $t) {
                use std::io::Cursor;

                use $crate::telemetry::traits::{ReadType, WriteType};

                let mut buf = Cursor::new(Vec::<u8>::new());
                match orig.write(&mut buf) {
                    Err(_) => {
                        // writing may legitimately fail (e.g. length overflow), skip
                    }
                    Ok(()) => {
                        buf.set_position(0);
                        let restored = <$t>::read(&mut buf).unwrap();
                        assert_eq!(orig, restored);
                    }
                }
            }
        }
    };
}

pub(crate) use test_roundtrip;
