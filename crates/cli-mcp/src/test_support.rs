//! Helpers for tests that need to watch a re-executed child

use std::path::Path;
use std::time::Duration;

/// `sh -c` script that writes its pid to the file named by `$0`, then sleeps
/// as that same process
pub const PID_SCRIPT: &str = "echo $$ > \"$0\"; exec sleep 30";

/// Wait until the child has written its pid
pub async fn read_pid(path: &Path) -> u32 {
    for _ in 0..200 {
        if let Ok(text) = tokio::fs::read_to_string(path).await {
            if let Ok(pid) = text.trim().parse() {
                return pid;
            }
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    panic!("child never wrote its pid to {}", path.display());
}

/// Zombies count as gone: they are killed, only not yet reaped
fn is_running(pid: u32) -> bool {
    match std::fs::read_to_string(format!("/proc/{}/stat", pid)) {
        Ok(stat) => stat
            .rsplit(')')
            .next()
            .and_then(|rest| rest.trim_start().chars().next())
            .map_or(false, |state| state != 'Z'),
        Err(_) => false,
    }
}

/// Fail unless `pid` stops running within a few seconds
pub async fn assert_exits(pid: u32) {
    for _ in 0..200 {
        if !is_running(pid) {
            return;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    panic!("process {} is still running", pid);
}
