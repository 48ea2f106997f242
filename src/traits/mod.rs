mod active_ops;
