mod job_lifecycle;
mod token_rotation;
