//! Process hardening for a server that holds the master key and decrypted
//! cluster credentials in memory.
//!
//! Two measures on Unix, both no-ops elsewhere:
//!
//! - [`disable_core_dumps`] sets `RLIMIT_CORE` to 0 so a crash cannot write
//!   the key or a kubeconfig to disk.
//! - [`lock_memory`] pins every page with `mlockall` so neither can be
//!   swapped out.

/// Set `RLIMIT_CORE` to 0. Call before the master key is loaded.
///
/// # Errors
///
/// Returns an error string if the `setrlimit` syscall fails.
#[cfg(unix)]
pub fn disable_core_dumps() -> Result<(), String> {
    let rlim = libc::rlimit {
        rlim_cur: 0,
        rlim_max: 0,
    };
    // SAFETY: `setrlimit` only reads the `rlimit` value passed by reference,
    // which lives on this stack frame for the duration of the call.
    #[allow(unsafe_code)]
    let result = unsafe { libc::setrlimit(libc::RLIMIT_CORE, &rlim) };

    if result == 0 {
        Ok(())
    } else {
        Err(format!(
            "setrlimit(RLIMIT_CORE, 0) failed: {}",
            std::io::Error::last_os_error()
        ))
    }
}

#[cfg(not(unix))]
pub fn disable_core_dumps() -> Result<(), String> {
    Ok(())
}

/// Pin all current and future pages with `mlockall`.
///
/// Needs `CAP_IPC_LOCK` or root. Set `KUBEWARD_DISABLE_MLOCK=true` to skip
/// it in development.
///
/// # Errors
///
/// Returns an error string if the `mlockall` syscall fails.
#[cfg(unix)]
pub fn lock_memory() -> Result<(), String> {
    // SAFETY: `mlockall` takes plain flags and touches no memory owned by
    // this process; failure is reported through the return value.
    #[allow(unsafe_code)]
    let result = unsafe { libc::mlockall(libc::MCL_CURRENT | libc::MCL_FUTURE) };

    if result == 0 {
        Ok(())
    } else {
        Err(format!(
            "mlockall(MCL_CURRENT | MCL_FUTURE) failed: {}",
            std::io::Error::last_os_error()
        ))
    }
}

#[cfg(not(unix))]
pub fn lock_memory() -> Result<(), String> {
    Ok(())
}
