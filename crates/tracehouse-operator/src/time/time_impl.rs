use std::ops::{Add, Sub};

use crate::time::Duration;

impl Add<Duration> for time::OffsetDateTime {
    type Output = Self;

    fn add(self, rhs: Duration) -> Self::Output {
        self.add(*rhs)
    }
}

impl Sub<Duration> for time::OffsetDateTime {
    type Output = Self;

    fn sub(self, rhs: Duration) -> Self::Output {
        self.sub(*rhs)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn offset_date_time_ops() {
        let issued = time::OffsetDateTime::from_unix_timestamp(1_700_000_000).unwrap();
        let refresh = Duration::from_minutes_unchecked(10);

        assert_eq!((issued + refresh).unix_timestamp(), 1_700_000_600);
        assert_eq!((issued - refresh).unix_timestamp(), 1_699_999_400);
        assert_eq!(issued + refresh - refresh, issued);
    }
}