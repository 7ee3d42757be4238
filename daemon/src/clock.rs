use chrono::NaiveDateTime;

pub trait Clock: Send + Sync + 'static {
    fn now(&self) -> NaiveDateTime;
}

/// Wall-clock local time, matching what operators type into the CLI.
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> NaiveDateTime {
        chrono::Local::now().naive_local()
    }
}

#[cfg(test)]
pub mod testing {
    use super::Clock;
    use chrono::{Duration, NaiveDateTime};
    use std::sync::Mutex;

    /// Clock that only moves when told to.
    pub struct ManualClock(Mutex<NaiveDateTime>);

    impl ManualClock {
        pub fn new(start: NaiveDateTime) -> Self {
            Self(Mutex::new(start))
        }

        pub fn advance(&self, by: Duration) {
            let mut now = self.0.lock().unwrap();
            *now += by;
        }
    }

    impl Clock for ManualClock {
        fn now(&self) -> NaiveDateTime {
            *self.0.lock().unwrap()
        }
    }
}
