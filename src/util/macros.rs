/**
  * Try to get the content of a result, returning a new error if there was one.
  * If an error occurs, it is logged together with the original error and
  * returned as result of the calling function.
  *
  * Params:
  *   $res: Result<T,E>
  *   $err: String
  *
  * Returns: T or Err(String)
  */
#[macro_export]
macro_rules! try_result {
    ($res:expr, $err:expr) => {
        match $res {
            Ok(val) => val,
            Err(orig) => {
                let msg = String::from($err);
                error!("{} ({})", msg, orig.to_string());
                return Err(format!("{} ({})", msg, orig.to_string()));
            }
        }
    }
}

/**
  * Try to get the content of an option, returning an error if there is no content
  * If an error occurs, it is returned as result of the calling function.
  *
  * Params:
  *   $opt: Option<T>
  *   $err: String
  *
  * Returns: T or Err(String)
  */
#[macro_export]
macro_rules! try_option {
    ($opt:expr, $err:expr) => {
        match $opt {
            Some(val) => val,
            None => {
                error!("{}", $err);
                return Err(String::from($err));
            }
        }
    }
}

/**
  * Log the error of a result without further handling it
  *
  * Params:
  *   $result: Result<T,E> where E: Display
  */
#[macro_export]
macro_rules! log_error {
    ($result:expr) => {
        if let Err(err) = $result {
            error!("{}", err);
        }
    }
}
