/// Render a time-left figure the way status lines show it.
///
/// Two minutes and up read in whole minutes, a minute up to that is "1 minute",
/// anything shorter is counted in seconds.
pub fn describe_time_left(seconds: u64) -> String {
    match seconds {
        120.. => format!("{} minutes", seconds / 60),
        60..=119 => "1 minute".to_string(),
        1 => "1 second".to_string(),
        _ => format!("{seconds} seconds"),
    }
}
